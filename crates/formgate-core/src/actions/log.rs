use serde_json::Value;
use tracing::info;

use crate::models::{ActionOutcome, Submission};
use crate::schema::{ActionSpec, LogConfig};

pub const ACTION_LOG_TARGET: &str = "formgate::action_log";
const DEFAULT_MESSAGE: &str = "Form submission processed";

pub struct LogAction;

impl LogAction {
    pub fn execute(&self, config: &LogConfig, submission: &Submission) -> ActionOutcome {
        let message = config.message.as_deref().unwrap_or(DEFAULT_MESSAGE);
        let data = Value::Object(submission.data.clone());
        info!(
            target: ACTION_LOG_TARGET,
            form_id = %submission.form_id,
            submission_id = %submission.id,
            data = %data,
            "{message}"
        );
        ActionOutcome::succeeded(ActionSpec::LOG, "Action logged successfully")
    }
}
