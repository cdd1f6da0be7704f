use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::Json;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client_ip::ClientIp;
use crate::error::ApiError;
use crate::state::AppState;

use super::PageParams;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub form_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: &'static str,
    pub id: String,
    pub timestamp: String,
}

pub async fn submit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_body)?;
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let receipt = state
        .forms
        .submit(&request.form_id, request.data, &ip, user_agent)
        .await
        .map_err(ApiError::form("Failed to process submission"))?;

    Ok(Json(SubmitResponse {
        success: true,
        message: "Form submitted successfully",
        timestamp: receipt
            .submission
            .submitted_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        id: receipt.submission.id,
    }))
}

pub async fn list_forms(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "forms": state.forms.list_forms(),
    }))
}

pub async fn get_form(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let schema = state
        .forms
        .schema(&form_id)
        .map_err(ApiError::form("Failed to load form"))?;
    Ok(Json(json!({ "success": true, "form": schema })))
}

pub async fn form_submissions(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>, ApiError> {
    let submissions = state
        .forms
        .form_submissions(&form_id, params.page())
        .await
        .map_err(ApiError::form("Failed to retrieve submissions"))?;
    Ok(Json(json!({
        "success": true,
        "count": submissions.len(),
        "submissions": submissions,
    })))
}
