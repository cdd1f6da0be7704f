use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use formgate_core::analytics::{AnalyticsRegister, DEFAULT_RETENTION_DAYS};
use formgate_core::HeartbeatRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::client_ip::ClientIp;
use crate::error::ApiError;
use crate::state::AppState;

fn register(state: &AppState) -> Result<&Arc<AnalyticsRegister>, ApiError> {
    state
        .analytics
        .as_ref()
        .ok_or(ApiError::Unavailable("Analytics collection is disabled"))
}

pub async fn submit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let register = register(&state)?;
    let Json(request) = payload.map_err(ApiError::invalid_body)?;
    if request.server_hash.is_empty() || request.version.is_empty() || request.signature.is_empty() {
        return Err(ApiError::invalid_body(
            "server_hash, version and signature are required",
        ));
    }

    if !register.verify_signature(&request, &ip) {
        let server: String = request.server_hash.chars().take(8).collect();
        warn!(client_ip = %ip, server = %server, "rejected heartbeat with invalid signature");
        return Err(ApiError::Unauthorized("Invalid signature"));
    }

    register
        .ingest(&request, &ip)
        .await
        .map_err(ApiError::analytics("Failed to process analytics"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Analytics processed successfully",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = register(&state)?
        .summarize()
        .await
        .map_err(ApiError::analytics("Failed to retrieve analytics summary"))?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    pub days: Option<String>,
}

impl CleanupParams {
    fn retention_days(&self) -> i64 {
        self.days
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_RETENTION_DAYS)
    }
}

pub async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<Value>, ApiError> {
    let removed = register(&state)?
        .sweep(params.retention_days())
        .await
        .map_err(ApiError::analytics("Failed to cleanup analytics"))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleaned up {removed} inactive servers"),
        "removed": removed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_defaults_when_missing_or_invalid() {
        let days = |raw: Option<&str>| {
            CleanupParams {
                days: raw.map(str::to_string),
            }
            .retention_days()
        };
        assert_eq!(days(None), 90);
        assert_eq!(days(Some("abc")), 90);
        assert_eq!(days(Some("0")), 90);
        assert_eq!(days(Some("14")), 14);
    }
}
