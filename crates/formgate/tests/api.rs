use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Extension;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use formgate::{router, AppState};
use formgate_core::actions::ActionPipeline;
use formgate_core::analytics::{sign, AnalyticsRegister};
use formgate_core::config::AppConfig;
use formgate_core::db::Database;
use formgate_core::email::{EmailError, EmailService, MailTransport, OutgoingEmail};
use formgate_core::notify::NotificationDispatcher;
use formgate_core::schema::FormDefinition;
use formgate_core::store::{SqliteStore, SubmissionStore};
use formgate_core::validation::Validator;
use formgate_core::{FormService, SchemaRegistry};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "test-secret";
const PEER: [u8; 4] = [192, 0, 2, 10];

#[derive(Default)]
struct Outbox(Mutex<Vec<OutgoingEmail>>);

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        self.0.lock().unwrap().push(email.clone());
        Ok(())
    }
}

struct TestApp {
    app: Router,
    outbox: Arc<Outbox>,
    _dir: TempDir,
}

fn config() -> Result<AppConfig> {
    let mut config = AppConfig::default();
    config.admin.username = "admin".into();
    config.admin.password = "hunter2".into();

    let contact: FormDefinition = serde_json::from_value(json!({
        "name": "Contact Us",
        "description": "Say hello",
        "fields": [
            {"name": "name", "type": "text", "required": true},
            {"name": "email", "type": "email", "required": true},
            {"name": "message", "type": "textarea", "required": true}
        ],
        "actions": [{"type": "log"}]
    }))?;
    let beta: FormDefinition = serde_json::from_value(json!({
        "name": "Beta Program",
        "fields": [{"name": "email", "type": "email", "required": true}],
        "actions": [{"type": "webhook"}]
    }))?;
    config.forms.forms.insert("contact".into(), contact);
    config.forms.forms.insert("beta".into(), beta);
    Ok(config)
}

async fn app_with(config: AppConfig, analytics: bool) -> Result<TestApp> {
    let dir = TempDir::new()?;
    let store = SqliteStore::connect(&dir.path().join("forms.db"), 2).await?;
    store.run_migrations().await?;
    let db = Database::from_sqlite(store);

    let outbox = Arc::new(Outbox::default());
    let email = EmailService::new(outbox.clone());
    let forms = FormService::new(
        SchemaRegistry::from_definitions(&config.forms.forms)?,
        Validator::default(),
        SubmissionStore::new(db.submissions(), dir.path().join("backups")),
        ActionPipeline::new(email.clone(), None, config.google_play.clone()),
        email,
        NotificationDispatcher::disabled(),
    );

    let mut state = AppState::new(Arc::new(forms), &config);
    if analytics {
        state = state.with_analytics(Arc::new(AnalyticsRegister::new(db.analytics(), SECRET)));
    }

    let app = router(state).layer(Extension(ConnectInfo(SocketAddr::from((PEER, 40000)))));
    Ok(TestApp {
        app,
        outbox,
        _dir: dir,
    })
}

async fn app() -> Result<TestApp> {
    app_with(config()?, false).await
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, HeaderMap, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, headers, body))
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn post_json(uri: &str, body: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Result<Request<Body>> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    Ok(match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    })
}

async fn login(app: &Router) -> Result<String> {
    let (status, _, body) = send(
        app,
        post_json("/api/admin/login", json!({"username": "admin", "password": "hunter2"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    Ok(body["token"].as_str().unwrap_or_default().to_string())
}

#[tokio::test]
async fn health_and_form_catalog() -> Result<()> {
    let t = app().await?;

    let (status, _, body) = send(&t.app, get("/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].as_str().is_some());

    for path in ["/api/forms", "/api/forms/"] {
        let (status, _, body) = send(&t.app, get(path)?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let ids: Vec<&str> = body["forms"]
            .as_array()
            .map(|forms| forms.iter().filter_map(|f| f["id"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(ids, ["beta", "contact"]);
    }

    let (status, _, body) = send(&t.app, get("/api/forms/contact")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["form"]["name"], "Contact Us");
    assert_eq!(body["form"]["fields"][1]["type"], "email");

    let (status, _, body) = send(&t.app, get("/api/forms/missing")?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"success": false, "error": "Form not found", "code": 404}));
    Ok(())
}

#[tokio::test]
async fn submit_validates_and_persists() -> Result<()> {
    let t = app().await?;

    let (status, _, body) = send(
        &t.app,
        post_json(
            "/api/forms/submit",
            json!({"form_id": "contact", "data": {"name": "A", "email": "a@b.com", "message": "hi"}}),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Form submitted successfully");
    let id = body["id"].as_str().unwrap_or_default().to_string();
    assert!(!id.is_empty());

    let (status, _, body) = send(
        &t.app,
        post_json("/api/forms/submit", json!({"form_id": "contact", "data": {"name": "A"}}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 400);
    assert_eq!(body["error"], "required field 'email' is missing");

    let (status, _, body) = send(&t.app, post_json("/api/forms/submit", json!({"data": {}}))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("Invalid request format")));

    let (status, _, _) = send(
        &t.app,
        post_json("/api/forms/submit", json!({"form_id": "nope", "data": {}}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&t.app, get("/api/forms/contact/submissions?limit=abc")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["submissions"][0]["id"], id.as_str());
    assert_eq!(body["submissions"][0]["processed"], true);
    assert_eq!(body["submissions"][0]["ip_address"], "192.0.2.10");
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_a_session() -> Result<()> {
    let t = app().await?;

    let (status, _, body) = send(&t.app, get("/api/admin/submissions")?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header required");

    let request = Request::builder()
        .uri("/api/admin/submissions")
        .header(header::AUTHORIZATION, "Token abc")
        .body(Body::empty())?;
    let (_, _, body) = send(&t.app, request).await?;
    assert_eq!(body["error"], "Invalid authorization format");

    let (_, _, body) = send(&t.app, authed("GET", "/api/admin/submissions", "deadbeef", None)?).await?;
    assert_eq!(body["error"], "Invalid or expired session");

    let (status, _, body) = send(
        &t.app,
        post_json("/api/admin/login", json!({"username": "admin", "password": "wrong"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let token = login(&t.app).await?;
    let (status, _, body) = send(&t.app, authed("GET", "/api/admin/submissions", &token, None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    Ok(())
}

#[tokio::test]
async fn login_is_unavailable_without_admin_credentials() -> Result<()> {
    let mut config = config()?;
    config.admin.password.clear();
    let t = app_with(config, false).await?;

    let (status, _, body) = send(
        &t.app,
        post_json("/api/admin/login", json!({"username": "admin", "password": ""}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Admin credentials not configured");
    Ok(())
}

#[tokio::test]
async fn admin_can_inspect_reprocess_welcome_and_delete() -> Result<()> {
    let t = app().await?;
    let (_, _, body) = send(
        &t.app,
        post_json("/api/forms/submit", json!({"form_id": "beta", "data": {"email": "t@example.com"}}))?,
    )
    .await?;
    let id = body["id"].as_str().unwrap_or_default().to_string();
    let token = login(&t.app).await?;

    let uri = format!("/api/admin/submissions/{id}");
    let (status, _, body) = send(&t.app, authed("GET", &uri, &token, None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submission"]["processed"], false);
    assert_eq!(body["submission"]["error"], "Webhook action not yet implemented; ");

    let (status, _, body) = send(
        &t.app,
        authed("POST", &format!("{uri}/reprocess"), &token, None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Submission reprocessed successfully");
    assert_eq!(body["result"]["success"], false);

    let (status, _, body) = send(
        &t.app,
        authed(
            "POST",
            "/api/admin/send-welcome-email",
            &token,
            Some(json!({"submission_id": id, "email": "t@example.com"})),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Welcome email sent to t@example.com");
    assert_eq!(t.outbox.0.lock().unwrap().len(), 1);

    let (status, _, _) = send(&t.app, authed("DELETE", &uri, &token, None)?).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _, body) = send(&t.app, authed("GET", &uri, &token, None)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Submission not found");
    let (status, _, _) = send(&t.app, authed("DELETE", &uri, &token, None)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn analytics_is_unavailable_when_disabled() -> Result<()> {
    let t = app().await?;
    let (status, _, body) = send(&t.app, get("/api/analytics/summary")?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Analytics collection is disabled");
    Ok(())
}

#[tokio::test]
async fn signed_heartbeats_are_counted() -> Result<()> {
    let t = app_with(config()?, true).await?;
    let peer_ip = "192.0.2.10";

    let heartbeat = json!({
        "server_hash": "0123456789abcdef",
        "version": "1.4.0",
        "signature": sign(SECRET.as_bytes(), "0123456789abcdef", "1.4.0", peer_ip),
    });
    let (status, _, body) = send(&t.app, post_json("/api/analytics/submit", heartbeat)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Analytics processed successfully");

    let forged = json!({
        "server_hash": "0123456789abcdef",
        "version": "1.5.0",
        "signature": sign(SECRET.as_bytes(), "0123456789abcdef", "1.5.0", "10.0.0.1"),
    });
    let (status, _, body) = send(&t.app, post_json("/api/analytics/submit", forged)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid signature");

    let (status, _, body) = send(&t.app, get("/api/analytics/summary")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_count"], 1);
    assert_eq!(body["data"]["active_count"], 1);
    assert_eq!(body["data"]["version_breakdown"]["1.4.0"], 1);

    let token = login(&t.app).await?;
    let (status, _, body) = send(
        &t.app,
        authed("POST", "/api/admin/analytics/cleanup?days=abc", &token, None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
    assert_eq!(body["message"], "Cleaned up 0 inactive servers");
    Ok(())
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_hint() -> Result<()> {
    let mut config = config()?;
    config.server.rate_limiting.requests_per_minute = 2;
    let t = app_with(config, false).await?;

    for _ in 0..2 {
        let (status, _, _) = send(&t.app, get("/health")?).await?;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = send(&t.app, get("/health")?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        headers.get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("60")
    );
    assert_eq!(body["retry_after"], 60);
    assert_eq!(body["code"], 429);
    Ok(())
}

#[tokio::test]
async fn cors_preflight_reflects_configured_origins() -> Result<()> {
    let preflight = |origin: &str| -> Result<Request<Body>> {
        Ok(Request::builder()
            .method("OPTIONS")
            .uri("/api/forms/submit")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())?)
    };
    let header_text = |headers: &HeaderMap, name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
    };

    let t = app().await?;
    let (status, headers, _) = send(&t.app, preflight("https://site.example")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        header_text(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN).as_deref(),
        Some("*")
    );
    let methods = header_text(&headers, header::ACCESS_CONTROL_ALLOW_METHODS).unwrap_or_default();
    assert!(methods.contains("post"), "allowed methods: {methods}");
    let allowed = header_text(&headers, header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap_or_default();
    assert!(allowed.contains("content-type"), "allowed headers: {allowed}");
    assert!(allowed.contains("authorization"), "allowed headers: {allowed}");
    assert_eq!(
        header_text(&headers, header::ACCESS_CONTROL_MAX_AGE).as_deref(),
        Some("43200")
    );

    let mut config = config()?;
    config.server.cors_origins = vec!["https://forms.example.com".into()];
    let t = app_with(config, false).await?;

    let (_, headers, _) = send(&t.app, preflight("https://forms.example.com")?).await?;
    assert_eq!(
        header_text(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN).as_deref(),
        Some("https://forms.example.com")
    );
    assert_eq!(
        header_text(&headers, header::ACCESS_CONTROL_ALLOW_CREDENTIALS).as_deref(),
        Some("true")
    );

    let (_, headers, _) = send(&t.app, preflight("https://elsewhere.example")?).await?;
    assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    Ok(())
}

#[tokio::test]
async fn feedback_listing_accepts_the_static_admin_token() -> Result<()> {
    let mut config = config()?;
    config.admin.api_token = "static-admin-token".into();
    let feedback: FormDefinition = serde_json::from_value(json!({
        "name": "Feedback",
        "fields": [{"name": "message", "type": "textarea", "required": true}],
        "actions": [{"type": "log"}]
    }))?;
    config.forms.forms.insert("feedback-form".into(), feedback);
    let t = app_with(config, false).await?;

    for message in ["love it", "found a bug"] {
        let (status, _, _) = send(
            &t.app,
            post_json(
                "/api/forms/submit",
                json!({"form_id": "feedback-form", "data": {"message": message}}),
            )?,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
    }
    send(
        &t.app,
        post_json("/api/forms/submit", json!({"form_id": "beta", "data": {"email": "x@example.com"}}))?,
    )
    .await?;

    let (status, _, body) = send(
        &t.app,
        authed("GET", "/api/admin/feedback?limit=1", "static-admin-token", None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["form_id"], "feedback-form");
    assert_eq!(body["count"], 1);
    assert_eq!(body["submissions"][0]["form_id"], "feedback-form");

    let (status, _, body) = send(&t.app, authed("GET", "/api/admin/feedback", "static-admin-token", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, _, _) = send(&t.app, authed("GET", "/api/admin/feedback", "static-admin-tokem", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}
