//! Post-submission actions.
//!
//! [`ActionPipeline::run`] executes a schema's actions in declared order and
//! never stops early: every action produces exactly one [`ActionOutcome`],
//! and the aggregate succeeds only if all of them did.

mod email;
mod log;
mod tester;
mod webhook;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GooglePlayConfig;
use crate::email::{EmailError, EmailService};
use crate::models::{timestamp_now, ActionOutcome, ProcessingResult, Submission};
use crate::schema::{ActionSpec, FormSchema};
use crate::tester::{TesterClient, TesterError};

pub use email::SendEmailAction;
pub use log::{LogAction, ACTION_LOG_TARGET};
pub use tester::AddTesterAction;
pub use webhook::WebhookAction;

/// Where in the enrollment transaction a tester call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesterStep {
    CreateEdit,
    ReadTesters,
    UpdateTesters,
    Commit,
}

impl TesterStep {
    fn describe(self) -> &'static str {
        match self {
            Self::CreateEdit => "create edit",
            Self::ReadTesters => "read testers",
            Self::UpdateTesters => "update testers",
            Self::Commit => "commit edit",
        }
    }
}

/// A single action's failure. Always folded into an [`ActionOutcome`].
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(
        "Google Play Console not configured (service_account_file: '{service_account_file}', package_name: '{package_name}')"
    )]
    TesterNotConfigured {
        service_account_file: String,
        package_name: String,
    },

    #[error("No email address found in submission")]
    MissingRecipient,

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Failed to {}: {source}", .step.describe())]
    Tester {
        step: TesterStep,
        #[source]
        source: TesterError,
    },

    #[error("Webhook action not yet implemented")]
    WebhookNotImplemented,

    #[error("Action type '{0}' is not supported")]
    Unsupported(String),
}

impl ActionError {
    pub(crate) fn tester(step: TesterStep) -> impl FnOnce(TesterError) -> Self {
        move |source| Self::Tester { step, source }
    }

    pub(crate) fn tester_not_configured(config: &GooglePlayConfig) -> Self {
        Self::TesterNotConfigured {
            service_account_file: config.service_account_file.clone(),
            package_name: config.package_name.clone(),
        }
    }

    /// Short operator-facing message for the outcome.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::TesterNotConfigured { .. } => "Google Play Console configuration missing",
            Self::MissingRecipient => "Email address required for Google Play testing",
            Self::Email(_) => "Failed to send email",
            Self::Tester { step, .. } => match step {
                TesterStep::CreateEdit => "Failed to create Google Play edit",
                TesterStep::ReadTesters => "Failed to read Google Play testers",
                TesterStep::UpdateTesters => "Failed to update Google Play testers",
                TesterStep::Commit => "Failed to commit Google Play changes",
            },
            Self::WebhookNotImplemented => "Webhook functionality coming soon",
            Self::Unsupported(_) => "Unknown action type",
        }
    }

    pub(crate) fn into_outcome(self, action_type: &str) -> ActionOutcome {
        ActionOutcome::failed(action_type, self.summary(), self.to_string())
    }
}

pub struct ActionPipeline {
    email: SendEmailAction,
    tester: AddTesterAction,
    log: LogAction,
    webhook: WebhookAction,
}

impl ActionPipeline {
    pub fn new(
        email: EmailService,
        tester_client: Option<Arc<dyn TesterClient>>,
        google_play: GooglePlayConfig,
    ) -> Self {
        Self {
            email: SendEmailAction::new(email.clone()),
            tester: AddTesterAction::new(tester_client, google_play, email),
            log: LogAction,
            webhook: WebhookAction,
        }
    }

    pub async fn run(&self, submission: &Submission, schema: &FormSchema) -> ProcessingResult {
        let mut outcomes = Vec::with_capacity(schema.actions.len());
        for action in &schema.actions {
            let outcome = self.execute(action, submission, schema).await;
            if outcome.success {
                debug!(submission_id = %submission.id, action = %action, "action succeeded");
            } else {
                warn!(
                    submission_id = %submission.id,
                    action = %action,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "action failed"
                );
            }
            outcomes.push(outcome);
        }

        ProcessingResult {
            submission_id: submission.id.clone(),
            form_id: submission.form_id.clone(),
            success: outcomes.iter().all(|outcome| outcome.success),
            actions: outcomes,
            processed_at: timestamp_now(),
        }
    }

    pub async fn execute(
        &self,
        action: &ActionSpec,
        submission: &Submission,
        schema: &FormSchema,
    ) -> ActionOutcome {
        match action {
            ActionSpec::SendEmail(config) => self.email.execute(config, submission, schema).await,
            ActionSpec::AddTester(config) => self.tester.execute(config, submission, schema).await,
            ActionSpec::Log(config) => self.log.execute(config, submission),
            ActionSpec::Webhook(config) => self.webhook.execute(config, submission),
            ActionSpec::Unknown { action_type, .. } => {
                ActionError::Unsupported(action_type.clone()).into_outcome(action_type)
            }
        }
    }
}
