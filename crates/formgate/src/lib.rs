//! HTTP surface of the formgate service.

pub mod client_ip;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/submissions", get(routes::admin::list_submissions))
        .route("/api/admin/feedback", get(routes::admin::feedback_submissions))
        .route(
            "/api/admin/submissions/{id}",
            get(routes::admin::get_submission).delete(routes::admin::delete_submission),
        )
        .route(
            "/api/admin/submissions/{id}/reprocess",
            post(routes::admin::reprocess_submission),
        )
        .route(
            "/api/admin/send-welcome-email",
            post(routes::admin::send_welcome_email),
        )
        .route("/api/admin/analytics/cleanup", post(routes::analytics::cleanup))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    let public = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/forms/submit", post(routes::forms::submit))
        .route("/api/forms", get(routes::forms::list_forms))
        .route("/api/forms/", get(routes::forms::list_forms))
        .route("/api/forms/{id}", get(routes::forms::get_form))
        .route("/api/forms/{id}/submissions", get(routes::forms::form_submissions))
        .route("/api/analytics/submit", post(routes::analytics::submit))
        .route("/api/analytics/summary", get(routes::analytics::summary))
        .route("/api/admin/login", post(routes::admin::login));

    let request_timeout = state.request_timeout;
    let cors = cors_layer(&state.cors_origins);
    public
        .merge(admin)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(middleware::handle_layer_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::log_requests,
        ))
        .with_state(state)
}

/// `"*"` allows any origin without credentials; an explicit list allows
/// credentialed requests from those origins only.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ORIGIN, CONTENT_TYPE, CONTENT_LENGTH, ACCEPT_ENCODING, AUTHORIZATION])
        .expose_headers([CONTENT_LENGTH])
        .max_age(Duration::from_secs(12 * 60 * 60));

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(allowed).allow_credentials(true)
}
