use crate::email::{resolve_recipient, Delivery, EmailError, EmailService};
use crate::models::{ActionOutcome, Submission};
use crate::schema::{ActionSpec, FormSchema, SendEmailConfig};

use super::ActionError;

pub struct SendEmailAction {
    email: EmailService,
}

impl SendEmailAction {
    pub fn new(email: EmailService) -> Self {
        Self { email }
    }

    pub async fn execute(
        &self,
        config: &SendEmailConfig,
        submission: &Submission,
        schema: &FormSchema,
    ) -> ActionOutcome {
        match self.send(config, submission, schema).await {
            Ok(message) => ActionOutcome::succeeded(ActionSpec::SEND_EMAIL, message),
            Err(err) => err.into_outcome(ActionSpec::SEND_EMAIL),
        }
    }

    async fn send(
        &self,
        config: &SendEmailConfig,
        submission: &Submission,
        schema: &FormSchema,
    ) -> Result<String, ActionError> {
        if let Some(platform) = welcome_platform(config, submission) {
            let to = resolve_recipient(submission).ok_or(EmailError::NoRecipient)?;
            self.email.send_welcome(submission, schema, to).await?;
            return Ok(format!("Welcome email sent to {platform} tester"));
        }

        match self.email.send_confirmation(submission, schema, config).await? {
            Delivery::Sent { .. } => Ok("Email sent successfully".to_string()),
            Delivery::Skipped => Ok("Email skipped: confirmation disabled for this form".to_string()),
        }
    }
}

/// The submission's `platform`, when it qualifies for the immediate welcome
/// email.
fn welcome_platform<'a>(config: &SendEmailConfig, submission: &'a Submission) -> Option<&'a str> {
    let platform = submission.text_field("platform")?;
    config
        .welcome_platforms
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(platform))
        .then_some(platform)
}
