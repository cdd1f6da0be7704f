//! Layered service configuration.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. The TOML file passed on the command line (skipped when it does not exist)
//! 3. Environment variables (`PORT`, `DB_TYPE`, `SMTP_HOST`, ...)
//!
//! Binaries call `dotenvy::dotenv()` before [`AppConfig::load`] so a local
//! `.env` file feeds the environment layer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgSslMode;
use thiserror::Error;

use crate::schema::FormDefinition;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported value '{value}' for {key}")]
    Unsupported { key: &'static str, value: String },

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("configuration incomplete: {0}")]
    Incomplete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl FromStr for DatabaseKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(ConfigError::Unsupported {
                key: "database.kind",
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Smtp,
    Sendgrid,
}

impl FromStr for EmailProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "sendgrid" => Ok(Self::Sendgrid),
            _ => Err(ConfigError::Unsupported {
                key: "email.provider",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub notifications: NotificationConfig,
    pub forms: FormsConfig,
    pub google_play: GooglePlayConfig,
    pub analytics: AnalyticsConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Resolve the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    pub request_timeout_secs: u64,
    /// Browser origins allowed to call the API. `"*"` allows any origin
    /// without credentials.
    pub cors_origins: Vec<String>,
    /// Externally reachable base URL, used for links in notifications.
    pub public_url: String,
    pub rate_limiting: RateLimitConfig,
}

impl ServerConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|origin| origin == "*")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
            trust_proxy_headers: false,
            request_timeout_secs: 30,
            cors_origins: vec!["*".to_string()],
            public_url: String::new(),
            rate_limiting: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    /// SQLite database file.
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::Sqlite,
            path: PathBuf::from("forms.db"),
            host: "localhost".to_string(),
            port: 5432,
            name: "forms".to_string(),
            username: String::new(),
            password: String::new(),
            ssl_mode: "disable".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub smtp: SmtpConfig,
    pub sendgrid: SendGridConfig,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: EmailProvider::Smtp,
            smtp: SmtpConfig::default(),
            sendgrid: SendGridConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub starttls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            starttls: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub ntfy: NtfyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NtfyConfig {
    pub enabled: bool,
    pub url: String,
    pub topic: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsConfig {
    pub storage_dir: PathBuf,
    /// Enforce each field's `validation` pattern in addition to required checks.
    pub enforce_patterns: bool,
    pub forms: BTreeMap<String, FormDefinition>,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./submissions"),
            enforce_patterns: false,
            forms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GooglePlayConfig {
    pub service_account_file: String,
    pub package_name: String,
}

impl GooglePlayConfig {
    pub fn is_configured(&self) -> bool {
        !self.service_account_file.trim().is_empty() && !self.package_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
    /// Static bearer token accepted on admin routes alongside login
    /// sessions. Empty disables it.
    pub api_token: String,
}

impl AdminConfig {
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl AppConfig {
    /// Load defaults, then the TOML file at `path` if it exists, then the
    /// process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay environment variables using `lookup` as the source.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(value) = get("PORT") {
            self.server.port = parse_number("PORT", &value)?;
        }
        if let Some(value) = get("HOST") {
            self.server.host = value;
        }
        if let Some(value) = get("DEBUG") {
            self.server.debug = parse_flag("DEBUG", &value)?;
        }
        if let Some(value) = get("CORS_ORIGINS") {
            self.server.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = get("PUBLIC_URL") {
            self.server.public_url = value;
        }

        if let Some(value) = get("DB_TYPE") {
            self.database.kind = value.parse()?;
        }
        if let Some(value) = get("DB_HOST") {
            self.database.host = value;
        }
        if let Some(value) = get("DB_PORT") {
            self.database.port = parse_number("DB_PORT", &value)?;
        }
        if let Some(value) = get("DB_NAME") {
            // The sqlite backend names its database by file path.
            self.database.path = PathBuf::from(&value);
            self.database.name = value;
        }
        if let Some(value) = get("DB_USER") {
            self.database.username = value;
        }
        if let Some(value) = get("DB_PASSWORD") {
            self.database.password = value;
        }
        if let Some(value) = get("DB_SSL_MODE") {
            self.database.ssl_mode = value;
        }

        if let Some(value) = get("EMAIL_PROVIDER") {
            self.email.provider = value.parse()?;
        }
        if let Some(value) = get("SMTP_HOST") {
            self.email.smtp.host = value;
        }
        if let Some(value) = get("SMTP_PORT") {
            self.email.smtp.port = parse_number("SMTP_PORT", &value)?;
        }
        if let Some(value) = get("SMTP_USERNAME") {
            self.email.smtp.username = value;
        }
        if let Some(value) = get("SMTP_PASSWORD") {
            self.email.smtp.password = value;
        }
        if let Some(value) = get("SMTP_FROM") {
            self.email.smtp.from = value;
        }
        if let Some(value) = get("SENDGRID_API_KEY") {
            self.email.sendgrid.api_key = value;
        }
        if let Some(value) = get("SENDGRID_FROM") {
            self.email.sendgrid.from = value;
        }

        if let Some(value) = get("NTFY_ENABLED") {
            self.notifications.ntfy.enabled = parse_flag("NTFY_ENABLED", &value)?;
        }
        if let Some(value) = get("NTFY_URL") {
            self.notifications.ntfy.url = value;
        }
        if let Some(value) = get("NTFY_TOPIC") {
            self.notifications.ntfy.topic = value;
        }
        if let Some(value) = get("NTFY_TOKEN") {
            self.notifications.ntfy.token = value;
        }

        if let Some(value) = get("FORMS_STORAGE_DIR") {
            self.forms.storage_dir = PathBuf::from(value);
        }

        if let Some(value) = get("GOOGLE_SERVICE_ACCOUNT_FILE") {
            self.google_play.service_account_file = value;
        }
        if let Some(value) = get("GOOGLE_PACKAGE_NAME") {
            self.google_play.package_name = value;
        }

        if let Some(value) = get("ANALYTICS_ENABLED") {
            self.analytics.enabled = parse_flag("ANALYTICS_ENABLED", &value)?;
        }
        if let Some(value) = get("ANALYTICS_SECRET_KEY") {
            self.analytics.secret_key = value;
        }

        if let Some(value) = get("ADMIN_USERNAME") {
            self.admin.username = value;
        }
        if let Some(value) = get("ADMIN_PASSWORD") {
            self.admin.password = value;
        }
        if let Some(value) = get("ADMIN_API_TOKEN") {
            self.admin.api_token = value;
        }

        Ok(())
    }

    /// Startup checks for settings that cannot be deferred to first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analytics.enabled && self.analytics.secret_key.is_empty() {
            return Err(ConfigError::Incomplete(
                "analytics is enabled but analytics.secret_key is empty".to_string(),
            ));
        }
        if self.notifications.ntfy.enabled && self.notifications.ntfy.url.is_empty() {
            return Err(ConfigError::Incomplete(
                "ntfy notifications are enabled but notifications.ntfy.url is empty".to_string(),
            ));
        }
        if self.server.rate_limiting.enabled && self.server.rate_limiting.requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                key: "server.rate_limiting.requests_per_minute",
                value: "0".to_string(),
            });
        }
        if self.database.ssl_mode.parse::<PgSslMode>().is_err() {
            return Err(ConfigError::Unsupported {
                key: "database.ssl_mode",
                value: self.database.ssl_mode.clone(),
            });
        }
        if let Some(origin) = self
            .server
            .cors_origins
            .iter()
            .find(|origin| origin.is_empty() || !origin.bytes().all(|b| b.is_ascii_graphic()))
        {
            return Err(ConfigError::Invalid {
                key: "server.cors_origins",
                value: origin.clone(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.server.rate_limiting.enabled);
        assert_eq!(config.server.rate_limiting.requests_per_minute, 60);
        assert_eq!(config.database.kind, DatabaseKind::Sqlite);
        assert_eq!(config.database.path, PathBuf::from("forms.db"));
        assert_eq!(config.email.smtp.port, 587);
        assert_eq!(config.forms.storage_dir, PathBuf::from("./submissions"));
    }

    #[test]
    fn toml_sections_and_forms_parse() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9090

            [database]
            kind = "postgres"
            host = "db"

            [forms.forms.contact]
            name = "Contact"
            description = "Get in touch"

            [[forms.forms.contact.fields]]
            name = "email"
            type = "email"
            required = true

            [[forms.forms.contact.actions]]
            type = "log"
            config = { message = "hello" }
            "#,
        )
        .expect("config parses");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.kind, DatabaseKind::Postgres);
        assert_eq!(config.database.host, "db");
        let contact = &config.forms.forms["contact"];
        assert_eq!(contact.fields.len(), 1);
        assert_eq!(contact.actions[0].action_type, "log");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("PORT", "3000"),
                ("DB_TYPE", "postgres"),
                ("SMTP_HOST", "mail.local"),
                ("NTFY_ENABLED", "true"),
                ("ADMIN_USERNAME", "root"),
                ("HOST", ""),
            ]))
            .expect("env applies");

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.kind, DatabaseKind::Postgres);
        assert_eq!(config.email.smtp.host, "mail.local");
        assert!(config.notifications.ntfy.enabled);
        assert_eq!(config.admin.username, "root");
    }

    #[test]
    fn unsupported_database_kind_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("DB_TYPE", "oracle")]))
            .expect_err("oracle is unsupported");
        assert!(matches!(err, ConfigError::Unsupported { key: "database.kind", .. }));
    }

    #[test]
    fn analytics_requires_a_secret() {
        let mut config = AppConfig::default();
        config.analytics.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Incomplete(_))));

        config.analytics.secret_key = "s3cret".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn misspelled_ssl_mode_is_rejected() {
        let mut config = AppConfig::default();
        config.database.ssl_mode = "requird".into();
        let err = config.validate().expect_err("typo must not fall back to plaintext");
        assert!(matches!(
            err,
            ConfigError::Unsupported { key: "database.ssl_mode", .. }
        ));

        config.database.ssl_mode = "verify-full".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cors_origins_come_from_a_comma_list() {
        let mut config = AppConfig::default();
        assert!(config.server.allows_any_origin());

        config
            .apply_env(env(&[(
                "CORS_ORIGINS",
                "https://example.com, https://beta.example.com,",
            )]))
            .expect("env applies");
        assert_eq!(
            config.server.cors_origins,
            ["https://example.com", "https://beta.example.com"]
        );
        assert!(!config.server.allows_any_origin());
        assert!(config.validate().is_ok());

        config.server.cors_origins = vec!["https://bad origin".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "server.cors_origins", .. })
        ));
    }

    #[test]
    fn example_config_is_valid() {
        let config = AppConfig::from_toml(include_str!("../../../config/formgate.example.toml"))
            .expect("example parses");
        config.validate().expect("example validates");

        let registry = crate::SchemaRegistry::from_definitions(&config.forms.forms)
            .expect("example forms resolve");
        assert_eq!(registry.len(), 2);
        assert!(registry.get("internal-testing").is_some());
    }
}
