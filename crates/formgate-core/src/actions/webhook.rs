use tracing::debug;

use crate::models::{ActionOutcome, Submission};
use crate::schema::{ActionSpec, WebhookConfig};

use super::ActionError;

/// Placeholder: always reports a failed outcome.
pub struct WebhookAction;

impl WebhookAction {
    pub fn execute(&self, config: &WebhookConfig, submission: &Submission) -> ActionOutcome {
        debug!(
            submission_id = %submission.id,
            url = config.url.as_deref().unwrap_or_default(),
            "webhook action skipped"
        );
        ActionError::WebhookNotImplemented.into_outcome(ActionSpec::WEBHOOK)
    }
}
