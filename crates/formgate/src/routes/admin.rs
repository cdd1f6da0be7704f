use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use formgate_core::sessions::credentials_match;
use formgate_core::FormError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

use super::PageParams;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::BadRequest("Invalid request format".into()))?;
    if !state.admin.is_configured() {
        return Err(ApiError::Unavailable("Admin credentials not configured"));
    }
    if !credentials_match(
        &state.admin.username,
        &state.admin.password,
        &request.username,
        &request.password,
    ) {
        return Err(ApiError::Unauthorized("Invalid credentials"));
    }

    let token = state.sessions.issue();
    info!("admin session issued");
    Ok(Json(json!({
        "success": true,
        "token": token,
        "message": "Login successful",
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmissionQuery {
    #[serde(flatten)]
    pub page: PageParams,
    pub form_id: Option<String>,
}

pub async fn list_submissions(
    State(state): State<AppState>,
    Query(query): Query<SubmissionQuery>,
) -> Result<Json<Value>, ApiError> {
    let form_id = query.form_id.as_deref().filter(|id| !id.is_empty());
    let submissions = state
        .forms
        .list_submissions(form_id, query.page.page())
        .await
        .map_err(ApiError::form("Failed to retrieve submissions"))?;
    Ok(Json(json!({
        "success": true,
        "count": submissions.len(),
        "submissions": submissions,
    })))
}

pub const FEEDBACK_FORM_ID: &str = "feedback-form";

/// Shortcut for the feedback form's submissions. Works whether or not the
/// form is still configured.
pub async fn feedback_submissions(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<Value>, ApiError> {
    let submissions = state
        .forms
        .list_submissions(Some(FEEDBACK_FORM_ID), page.page())
        .await
        .map_err(ApiError::form("Failed to retrieve feedback submissions"))?;
    Ok(Json(json!({
        "success": true,
        "count": submissions.len(),
        "form_id": FEEDBACK_FORM_ID,
        "submissions": submissions,
    })))
}

pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let submission = state
        .forms
        .get(&id)
        .await
        .map_err(ApiError::form("Failed to retrieve submission"))?;
    Ok(Json(json!({ "success": true, "submission": submission })))
}

pub async fn delete_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .forms
        .delete(&id)
        .await
        .map_err(ApiError::form("Failed to delete submission"))?;
    Ok(Json(json!({
        "success": true,
        "message": "Submission deleted successfully",
    })))
}

pub async fn reprocess_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .forms
        .reprocess(&id)
        .await
        .map_err(ApiError::form("Failed to reprocess submission"))?;
    Ok(Json(json!({
        "success": true,
        "message": "Submission reprocessed successfully",
        "result": result,
    })))
}

#[derive(Debug, Deserialize)]
pub struct WelcomeRequest {
    pub submission_id: String,
    pub email: String,
}

pub async fn send_welcome_email(
    State(state): State<AppState>,
    payload: Result<Json<WelcomeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_body)?;
    let email = request.email.trim();
    if request.submission_id.is_empty() || email.is_empty() {
        return Err(ApiError::invalid_body("submission_id and email are required"));
    }

    state
        .forms
        .send_welcome(&request.submission_id, email)
        .await
        .map_err(|err| match err {
            FormError::UnknownForm(_) => ApiError::NotFound("Form configuration not found"),
            other => ApiError::form("Failed to send welcome email")(other),
        })?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Welcome email sent to {email}"),
    })))
}
