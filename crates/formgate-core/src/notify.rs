//! Best-effort push notifications (ntfy) after a submission is processed.
//!
//! Dispatch is detached from the request: the task is spawned and its
//! failures are only logged.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{AppConfig, NtfyConfig};
use crate::email::resolve_recipient;
use crate::models::{ProcessingResult, Submission};
use crate::schema::{ActionSpec, FormSchema};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifications are disabled")]
    Disabled,

    #[error("failed to send ntfy notification: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ntfy server returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NtfyMessage {
    pub topic: String,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub priority: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NtfyAction>,
}

/// An ntfy `http` action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NtfyAction {
    pub action: String,
    pub label: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Where the "Send Welcome Email" button points and the bearer token it
/// presents to the admin route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalEndpoint {
    pub base_url: String,
    pub token: String,
}

impl ApprovalEndpoint {
    /// `None` unless a public base URL is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let base_url = config.server.public_url.trim_end_matches('/');
        (!base_url.is_empty()).then(|| Self {
            base_url: base_url.to_string(),
            token: config.admin.api_token.clone(),
        })
    }
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn publish(&self, message: &NtfyMessage) -> Result<(), NotifyError>;
}

/// Publishes JSON messages to an ntfy server root URL.
pub struct NtfyChannel {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl NtfyChannel {
    pub fn new(config: &NtfyConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(PUBLISH_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            token: Some(config.token.clone()).filter(|token| !token.is_empty()),
        })
    }
}

#[async_trait]
impl PushChannel for NtfyChannel {
    async fn publish(&self, message: &NtfyMessage) -> Result<(), NotifyError> {
        let mut request = self.http.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Builds the human-readable summary for one processed submission.
pub fn format_submission_message(
    topic: &str,
    form_name: &str,
    submission: &Submission,
    result: &ProcessingResult,
) -> NtfyMessage {
    let (status, tags, priority) = if result.success {
        ("✅ Successfully processed", vec!["white_check_mark", "forms"], 3)
    } else {
        ("❌ Processing failed", vec!["x", "forms", "error"], 4)
    };

    let mut data = String::new();
    for (key, value) in &submission.data {
        match key.as_str() {
            "platform" => {
                let platform = if value.as_str() == Some("ios") {
                    "iOS (TestFlight)"
                } else {
                    "Android"
                };
                let _ = writeln!(data, "platform: {platform}");
            }
            "wantsNews" => {
                let wants = matches!(value, Value::Bool(true)) || value.as_str() == Some("true");
                let _ = writeln!(data, "News Updates: {}", if wants { "Yes" } else { "No" });
            }
            _ => {
                let shown = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(data, "{key}: {shown}");
            }
        }
    }

    let short_id: String = submission.id.chars().take(8).collect();
    let mut message = format!(
        "{status}\n\nForm: {form_name}\nSubmission ID: {short_id}\nSubmitted: {}\nIP Address: {}\n\nData:\n{data}",
        submission.submitted_at.format("%Y-%m-%d %H:%M:%S"),
        submission.ip_address,
    );

    if !result.success {
        message.push_str("\nAction Results:\n");
        for action in &result.actions {
            let icon = if action.success { "✅" } else { "❌" };
            let _ = writeln!(message, "{icon} {}: {}", action.action_type, action.message);
            if let Some(error) = action.error.as_deref().filter(|e| !e.is_empty()) {
                let _ = writeln!(message, "   Error: {error}");
            }
        }
    }

    NtfyMessage {
        topic: topic.to_string(),
        title: format!("Form Submission: {form_name}"),
        message,
        tags: tags.into_iter().map(str::to_string).collect(),
        priority,
        actions: Vec::new(),
    }
}

/// Manual approval button for submissions that went through cleanly but
/// whose platform is not fast-tracked by a `send_email` action's
/// `welcome_platforms`.
pub fn approval_action(
    endpoint: &ApprovalEndpoint,
    schema: &FormSchema,
    submission: &Submission,
    result: &ProcessingResult,
) -> Option<NtfyAction> {
    if !result.success {
        return None;
    }
    let welcome_platforms: Vec<&str> = schema
        .actions
        .iter()
        .filter_map(|action| match action {
            ActionSpec::SendEmail(config) => Some(config.welcome_platforms.iter()),
            _ => None,
        })
        .flatten()
        .map(String::as_str)
        .collect();
    if welcome_platforms.is_empty() {
        return None;
    }

    let platform = submission.text_field("platform")?;
    if welcome_platforms
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(platform))
    {
        return None;
    }
    let email = resolve_recipient(submission)?;

    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    if !endpoint.token.is_empty() {
        headers.insert("Authorization".to_string(), format!("Bearer {}", endpoint.token));
    }

    Some(NtfyAction {
        action: "http".to_string(),
        label: "Send Welcome Email".to_string(),
        url: format!("{}/api/admin/send-welcome-email", endpoint.base_url),
        method: "POST".to_string(),
        headers,
        body: json!({"submission_id": submission.id, "email": email}).to_string(),
    })
}

#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    channel: Option<Arc<dyn PushChannel>>,
    topic: String,
    approval: Option<ApprovalEndpoint>,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn PushChannel>, topic: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            topic: topic.into(),
            approval: None,
        }
    }

    pub fn with_approval(mut self, endpoint: ApprovalEndpoint) -> Self {
        self.approval = Some(endpoint);
        self
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, NotifyError> {
        let ntfy = &config.notifications.ntfy;
        if !ntfy.enabled {
            return Ok(Self::disabled());
        }
        let channel = NtfyChannel::new(ntfy)?;
        let mut dispatcher = Self::new(Arc::new(channel), ntfy.topic.clone());
        if let Some(endpoint) = ApprovalEndpoint::from_config(config) {
            dispatcher = dispatcher.with_approval(endpoint);
        }
        Ok(dispatcher)
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// Spawns the publish and returns immediately. `None` when disabled.
    pub fn dispatch(
        &self,
        schema: &FormSchema,
        submission: &Submission,
        result: &ProcessingResult,
    ) -> Option<JoinHandle<()>> {
        let channel = self.channel.clone()?;
        let mut message =
            format_submission_message(&self.topic, schema.display_name(), submission, result);
        if let Some(endpoint) = &self.approval {
            message
                .actions
                .extend(approval_action(endpoint, schema, submission, result));
        }
        let submission_id = submission.id.clone();

        Some(tokio::spawn(async move {
            match channel.publish(&message).await {
                Ok(()) => debug!(submission_id = %submission_id, "notification sent"),
                Err(err) => warn!(
                    submission_id = %submission_id,
                    error = %err,
                    "failed to send submission notification"
                ),
            }
        }))
    }

    pub async fn send_test(&self) -> Result<(), NotifyError> {
        let channel = self.channel.as_ref().ok_or(NotifyError::Disabled)?;
        let message = NtfyMessage {
            topic: self.topic.clone(),
            title: "Test Notification".to_string(),
            message: "Formgate is running and notifications are working!".to_string(),
            tags: vec!["gear".to_string(), "test".to_string()],
            priority: 3,
            actions: Vec::new(),
        };
        channel.publish(&message).await
    }
}
