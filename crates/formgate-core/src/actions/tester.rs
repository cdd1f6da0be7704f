use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GooglePlayConfig;
use crate::email::{resolve_recipient, EmailService};
use crate::models::{ActionOutcome, Submission};
use crate::schema::{ActionSpec, AddTesterConfig, FormSchema};
use crate::tester::TesterClient;

use super::{ActionError, TesterStep};

pub struct AddTesterAction {
    client: Option<Arc<dyn TesterClient>>,
    config: GooglePlayConfig,
    email: EmailService,
}

impl AddTesterAction {
    /// `client` is only consulted when `config` names both a service account
    /// file and a package.
    pub fn new(
        client: Option<Arc<dyn TesterClient>>,
        config: GooglePlayConfig,
        email: EmailService,
    ) -> Self {
        Self {
            client,
            config,
            email,
        }
    }

    pub async fn execute(
        &self,
        config: &AddTesterConfig,
        submission: &Submission,
        schema: &FormSchema,
    ) -> ActionOutcome {
        match self.enroll(config, submission).await {
            Ok(email) => {
                let mut message =
                    format!("Successfully added {email} to {} testing track", config.track);
                if schema.email.sends_confirmation() {
                    if let Err(err) = self
                        .email
                        .send_confirmation(submission, schema, &Default::default())
                        .await
                    {
                        message.push_str(&format!(" (Note: Confirmation email failed: {err})"));
                    }
                }
                ActionOutcome::succeeded(ActionSpec::ADD_TESTER, message)
            }
            Err(err) => err.into_outcome(ActionSpec::ADD_TESTER),
        }
    }

    async fn enroll(
        &self,
        config: &AddTesterConfig,
        submission: &Submission,
    ) -> Result<String, ActionError> {
        let client = match &self.client {
            Some(client) if self.config.is_configured() => client,
            _ => return Err(ActionError::tester_not_configured(&self.config)),
        };
        let email = resolve_recipient(submission)
            .ok_or(ActionError::MissingRecipient)?
            .to_string();
        let track = config.track.as_str();

        let edit_id = client
            .insert_edit()
            .await
            .map_err(ActionError::tester(TesterStep::CreateEdit))?;

        match self.apply(client.as_ref(), &edit_id, track, &email).await {
            Ok(()) => {
                info!(submission_id = %submission.id, track, "tester enrolled");
                Ok(email)
            }
            Err(err) => {
                if let Err(rollback) = client.delete_edit(&edit_id).await {
                    warn!(edit_id = %edit_id, error = %rollback, "failed to delete abandoned edit");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        client: &dyn TesterClient,
        edit_id: &str,
        track: &str,
        email: &str,
    ) -> Result<(), ActionError> {
        let mut testers = client
            .get_testers(edit_id, track)
            .await
            .map_err(ActionError::tester(TesterStep::ReadTesters))?;

        if !testers.iter().any(|existing| existing.eq_ignore_ascii_case(email)) {
            testers.push(email.to_string());
        }

        client
            .update_testers(edit_id, track, &testers)
            .await
            .map_err(ActionError::tester(TesterStep::UpdateTesters))?;
        client
            .commit_edit(edit_id)
            .await
            .map_err(ActionError::tester(TesterStep::Commit))
    }
}
