use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use formgate_core::analytics::AnalyticsError;
use formgate_core::store::StoreError;
use formgate_core::FormError;
use serde::Serialize;
use tracing::error;

pub const RETRY_AFTER_SECS: u64 = 60;

/// Every failure the HTTP layer reports, rendered as
/// `{success: false, error, code}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(&'static str),
    NotFound(&'static str),
    RateLimited,
    Timeout,
    Unavailable(&'static str),
    Internal(String),
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    error: &'a str,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(message) | Self::Internal(message) => message,
            Self::Unauthorized(message) | Self::NotFound(message) | Self::Unavailable(message) => {
                message
            }
            Self::RateLimited => "Rate limit exceeded",
            Self::Timeout => "Request timed out",
        }
    }

    pub fn invalid_body(detail: impl std::fmt::Display) -> Self {
        Self::BadRequest(format!("Invalid request format: {detail}"))
    }

    /// Logs `err` and wraps it as a 500 prefixed with `context`.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!(error = %err, "{context}");
        Self::Internal(format!("{context}: {err}"))
    }

    /// Maps a service failure; anything that is not a client error becomes a
    /// 500 prefixed with `context`.
    pub fn form(context: &'static str) -> impl FnOnce(FormError) -> Self {
        move |err| match err {
            FormError::UnknownForm(_) => Self::NotFound("Form not found"),
            FormError::Store(StoreError::NotFound(_)) => Self::NotFound("Submission not found"),
            FormError::Validation(err) => Self::BadRequest(err.to_string()),
            other => Self::internal(context, other),
        }
    }

    pub fn analytics(context: &'static str) -> impl FnOnce(AnalyticsError) -> Self {
        move |err| match err {
            AnalyticsError::InvalidRetention(_) => Self::BadRequest(err.to_string()),
            other => Self::internal(context, other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = matches!(self, Self::RateLimited).then_some(RETRY_AFTER_SECS);
        let body = Envelope {
            success: false,
            error: self.message(),
            code: status.as_u16(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
