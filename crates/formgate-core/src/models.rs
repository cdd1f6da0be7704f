use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current UTC time truncated to microseconds, the finest precision both
/// storage backends round-trip exactly.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: String,
    pub form_id: String,
    pub data: Map<String, Value>,
    pub ip_address: String,
    pub user_agent: String,
    pub submitted_at: DateTime<Utc>,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Submission {
    /// A fresh, unprocessed submission. The id stays empty until the store
    /// assigns one.
    pub fn new(
        form_id: impl Into<String>,
        data: Map<String, Value>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            form_id: form_id.into(),
            data,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            submitted_at: timestamp_now(),
            processed: false,
            processed_at: None,
            error: None,
        }
    }

    /// Returns the trimmed string value of `field`, if it is a non-empty string.
    pub fn text_field(&self, field: &str) -> Option<&str> {
        self.data
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn reset_processing(&mut self) {
        self.processed = false;
        self.processed_at = None;
        self.error = None;
    }

    /// Folds a pipeline result back into the mutable processing columns.
    pub fn apply_result(&mut self, result: &ProcessingResult) {
        self.processed = result.success;
        self.processed_at = Some(result.processed_at);
        self.error = result.failure_summary();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action_type: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(action_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(
        action_type: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            success: false,
            message: message.into(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingResult {
    pub submission_id: String,
    pub form_id: String,
    pub success: bool,
    pub actions: Vec<ActionOutcome>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Concatenated `"<error>; "` text of every failed action, or `None` when
    /// nothing failed with an error message.
    pub fn failure_summary(&self) -> Option<String> {
        let summary: String = self
            .actions
            .iter()
            .filter(|outcome| !outcome.success)
            .filter_map(|outcome| outcome.error.as_deref())
            .filter(|error| !error.is_empty())
            .map(|error| format!("{error}; "))
            .collect();

        if summary.is_empty() {
            None
        } else {
            Some(summary)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub server_hash: String,
    pub version: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsRecord {
    pub id: String,
    pub server_hash: String,
    pub version: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ip_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsSummary {
    pub total_count: i64,
    pub active_count: i64,
    pub version_breakdown: BTreeMap<String, i64>,
    pub as_of: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with(actions: Vec<ActionOutcome>) -> ProcessingResult {
        ProcessingResult {
            submission_id: "s".into(),
            form_id: "f".into(),
            success: actions.iter().all(|a| a.success),
            actions,
            processed_at: timestamp_now(),
        }
    }

    #[test]
    fn failure_summary_joins_failed_errors() {
        let result = result_with(vec![
            ActionOutcome::failed("webhook", "soon", "not implemented"),
            ActionOutcome::succeeded("log", "ok"),
            ActionOutcome::failed("send_email", "Failed to send email", "smtp down"),
        ]);
        assert_eq!(
            result.failure_summary().as_deref(),
            Some("not implemented; smtp down; ")
        );
    }

    #[test]
    fn apply_result_marks_processing_columns() {
        let mut submission = Submission::new(
            "contact",
            json!({"name": "A"}).as_object().cloned().unwrap_or_default(),
            "127.0.0.1",
            "test",
        );
        let result = result_with(vec![ActionOutcome::succeeded("log", "ok")]);
        submission.apply_result(&result);
        assert!(submission.processed);
        assert_eq!(submission.processed_at, Some(result.processed_at));
        assert!(submission.error.is_none());

        submission.reset_processing();
        assert!(!submission.processed);
        assert!(submission.processed_at.is_none());
    }

    #[test]
    fn text_field_ignores_blank_and_non_strings() {
        let data = json!({"email": "  a@b.com ", "blank": "   ", "count": 3});
        let submission = Submission::new(
            "contact",
            data.as_object().cloned().unwrap_or_default(),
            "",
            "",
        );
        assert_eq!(submission.text_field("email"), Some("a@b.com"));
        assert_eq!(submission.text_field("blank"), None);
        assert_eq!(submission.text_field("count"), None);
    }
}
