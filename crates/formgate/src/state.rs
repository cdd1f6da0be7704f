use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use formgate_core::actions::ActionPipeline;
use formgate_core::analytics::AnalyticsRegister;
use formgate_core::config::{AdminConfig, AppConfig};
use formgate_core::db::Database;
use formgate_core::email::EmailService;
use formgate_core::notify::NotificationDispatcher;
use formgate_core::rate_limit::RateLimiter;
use formgate_core::sessions::SessionStore;
use formgate_core::store::SubmissionStore;
use formgate_core::tester::{GooglePlayClient, TesterClient};
use formgate_core::validation::Validator;
use formgate_core::{FormService, SchemaRegistry};
use tracing::{debug, info};

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);
const EVICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct AppState {
    pub forms: Arc<FormService>,
    /// `None` when analytics collection is switched off.
    pub analytics: Option<Arc<AnalyticsRegister>>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub admin: AdminConfig,
    pub trust_proxy_headers: bool,
    pub request_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(forms: Arc<FormService>, config: &AppConfig) -> Self {
        let rate_limiting = &config.server.rate_limiting;
        Self {
            forms,
            analytics: None,
            sessions: Arc::new(SessionStore::default()),
            rate_limiter: rate_limiting
                .enabled
                .then(|| Arc::new(RateLimiter::per_minute(rate_limiting.requests_per_minute))),
            admin: config.admin.clone(),
            trust_proxy_headers: config.server.trust_proxy_headers,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs.max(1)),
            cors_origins: config.server.cors_origins.clone(),
        }
    }

    pub fn with_analytics(mut self, register: Arc<AnalyticsRegister>) -> Self {
        self.analytics = Some(register);
        self
    }

    /// Opens the database, applies migrations and wires every collaborator
    /// named in `config`.
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let database = Database::connect(&config.database)
            .await
            .context("failed to connect to database")?;
        database
            .run_migrations()
            .await
            .context("failed to apply migrations")?;

        let registry = SchemaRegistry::from_definitions(&config.forms.forms)
            .context("invalid form definitions")?;
        info!(forms = registry.len(), "form schemas loaded");

        let email = EmailService::from_config(&config.email).context("invalid email settings")?;
        let tester: Option<Arc<dyn TesterClient>> = if config.google_play.is_configured() {
            let http = reqwest::Client::builder()
                .timeout(OUTBOUND_TIMEOUT)
                .build()
                .context("failed to build HTTP client")?;
            Some(Arc::new(GooglePlayClient::new(&config.google_play, http)))
        } else {
            None
        };
        let pipeline = ActionPipeline::new(email.clone(), tester, config.google_play.clone());
        let notifier = NotificationDispatcher::from_config(config)
            .context("invalid ntfy settings")?;

        let store = SubmissionStore::new(database.submissions(), &config.forms.storage_dir);
        let forms = FormService::new(
            registry,
            Validator::new(config.forms.enforce_patterns),
            store,
            pipeline,
            email,
            notifier,
        );

        let mut state = Self::new(Arc::new(forms), config);
        if config.analytics.enabled {
            state = state.with_analytics(Arc::new(AnalyticsRegister::new(
                database.analytics(),
                config.analytics.secret_key.clone(),
            )));
        }
        Ok(state)
    }

    /// Periodically drops expired sessions and idle rate-limit entries.
    pub fn spawn_eviction(&self) -> tokio::task::JoinHandle<()> {
        let sessions = self.sessions.clone();
        let limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let sessions_removed = sessions.evict_expired_at(now);
                let clients_removed = limiter
                    .as_ref()
                    .map_or(0, |limiter| limiter.evict_idle_at(now));
                debug!(sessions_removed, clients_removed, "evicted stale entries");
            }
        })
    }
}
