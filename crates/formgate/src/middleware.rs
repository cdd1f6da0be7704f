use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use formgate_core::security::constant_time_eq_str;
use tower::BoxError;
use tracing::info;

use crate::client_ip::ClientIp;
use crate::error::ApiError;
use crate::state::AppState;

/// Rejects requests once the caller exceeds the per-minute budget.
pub async fn rate_limit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.check(&ip) {
            info!(client_ip = %ip, "rate limit exceeded");
            return ApiError::RateLimited.into_response();
        }
    }
    next.run(request).await
}

/// Requires `Authorization: Bearer <token>` naming a live admin session or
/// the configured static API token.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(ApiError::Unauthorized("Authorization header required"))?;
    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| *scheme == "Bearer")
        .map(|(_, token)| token)
        .ok_or(ApiError::Unauthorized("Invalid authorization format"))?;

    let api_token = &state.admin.api_token;
    let static_token = !api_token.is_empty() && constant_time_eq_str(token, api_token);
    if !static_token && !state.sessions.validate(token) {
        return Err(ApiError::Unauthorized("Invalid or expired session"));
    }
    Ok(next.run(request).await)
}

pub async fn log_requests(ClientIp(ip): ClientIp, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        client_ip = %ip,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

pub async fn handle_layer_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::Timeout
    } else {
        ApiError::internal("Unhandled middleware error", err)
    }
}
