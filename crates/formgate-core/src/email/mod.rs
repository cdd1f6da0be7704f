//! Outbound email: recipient resolution, template rendering, and the
//! transports behind [`MailTransport`].

mod smtp;
pub mod templates;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{EmailConfig, EmailProvider};
use crate::models::Submission;
use crate::schema::{FormSchema, SendEmailConfig};

pub use smtp::{SendGridMailer, SmtpMailer};
pub use templates::{CONFIRMATION_TEMPLATE, WELCOME_TEMPLATE};

/// Field names checked, in order, for the submitter's address.
pub const RECIPIENT_FIELDS: [&str; 5] = ["email", "email_address", "Email", "Email_Address", "e_mail"];

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("no email address found in submission data")]
    NoRecipient,

    #[error("email sender address is not configured")]
    MissingSender,

    #[error("invalid email address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to build email message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("failed to send SMTP email: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("{0} email provider not yet implemented")]
    NotImplemented(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { to: String },
    /// The form's email policy does not ask for a confirmation.
    Skipped,
}

/// Returns the first non-blank recipient address found in the submission.
pub fn resolve_recipient(submission: &Submission) -> Option<&str> {
    RECIPIENT_FIELDS
        .iter()
        .find_map(|field| submission.text_field(field))
}

#[derive(Clone)]
pub struct EmailService {
    transport: Arc<dyn MailTransport>,
}

impl EmailService {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, EmailError> {
        let transport: Arc<dyn MailTransport> = match config.provider {
            EmailProvider::Smtp => Arc::new(SmtpMailer::from_config(&config.smtp)?),
            EmailProvider::Sendgrid => Arc::new(SendGridMailer),
        };
        Ok(Self::new(transport))
    }

    /// Sends the form's confirmation email unless the form's policy turns it
    /// off. `overrides` may replace the template and subject.
    pub async fn send_confirmation(
        &self,
        submission: &Submission,
        schema: &FormSchema,
        overrides: &SendEmailConfig,
    ) -> Result<Delivery, EmailError> {
        if !schema.email.sends_confirmation() {
            return Ok(Delivery::Skipped);
        }

        let to = resolve_recipient(submission).ok_or(EmailError::NoRecipient)?;
        let template = overrides
            .template
            .as_deref()
            .unwrap_or(schema.email.template.as_str());
        let subject = overrides
            .subject
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_subject(schema));

        let email = OutgoingEmail {
            to: to.to_string(),
            body: templates::render(template, &subject, submission, schema),
            subject,
            html: true,
        };
        self.transport.send(&email).await?;
        info!(
            submission_id = %submission.id,
            form_id = %submission.form_id,
            "confirmation email sent"
        );
        Ok(Delivery::Sent { to: email.to })
    }

    /// Sends the internal-testing welcome email to `to`.
    pub async fn send_welcome(
        &self,
        submission: &Submission,
        schema: &FormSchema,
        to: &str,
    ) -> Result<(), EmailError> {
        let subject = welcome_subject(schema);
        let email = OutgoingEmail {
            to: to.to_string(),
            body: templates::render(WELCOME_TEMPLATE, &subject, submission, schema),
            subject,
            html: true,
        };
        self.transport.send(&email).await?;
        info!(submission_id = %submission.id, "welcome email sent");
        Ok(())
    }

    pub async fn send_test(&self, to: &str) -> Result<(), EmailError> {
        let email = OutgoingEmail {
            to: to.to_string(),
            subject: "Formgate - Test Email".to_string(),
            body: "This is a test email from the formgate service. \
                   If you received this, email sending is working correctly!"
                .to_string(),
            html: false,
        };
        self.transport.send(&email).await
    }
}

fn default_subject(schema: &FormSchema) -> String {
    if schema.email.subject.is_empty() {
        format!("{} - submission received", schema.display_name())
    } else {
        schema.email.subject.clone()
    }
}

pub fn welcome_subject(schema: &FormSchema) -> String {
    format!("Welcome to {} Internal Testing - You're In!", schema.display_name())
}
