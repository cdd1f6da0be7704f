//! Tester enrollment against the Google Play Android Publisher API.
//!
//! Enrollment is an edit transaction: insert an edit, read the track's
//! tester list, write it back with the new address, commit. The action layer
//! drives those steps through [`TesterClient`] so it can roll back by
//! deleting the edit.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::GooglePlayConfig;

const API_BASE: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3/applications";
const SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TesterError {
    #[error("failed to read service account file {path}: {source}")]
    CredentialsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid service account file: {0}")]
    CredentialsFormat(#[from] serde_json::Error),

    #[error("failed to sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned status {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },
}

#[async_trait]
pub trait TesterClient: Send + Sync {
    /// Opens an edit and returns its id.
    async fn insert_edit(&self) -> Result<String, TesterError>;

    async fn get_testers(&self, edit_id: &str, track: &str) -> Result<Vec<String>, TesterError>;

    async fn update_testers(
        &self,
        edit_id: &str,
        track: &str,
        testers: &[String],
    ) -> Result<(), TesterError>;

    async fn commit_edit(&self, edit_id: &str) -> Result<(), TesterError>;

    async fn delete_edit(&self, edit_id: &str) -> Result<(), TesterError>;
}

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AppEdit {
    id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Testers {
    #[serde(default)]
    google_groups: Vec<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// REST client authenticated with a service-account JWT bearer grant.
pub struct GooglePlayClient {
    http: reqwest::Client,
    service_account_file: PathBuf,
    package_name: String,
    token: Mutex<Option<CachedToken>>,
}

impl GooglePlayClient {
    pub fn new(config: &GooglePlayConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            service_account_file: PathBuf::from(&config.service_account_file),
            package_name: config.package_name.clone(),
            token: Mutex::new(None),
        }
    }

    fn edit_url(&self, edit_id: &str) -> String {
        format!("{API_BASE}/{}/edits/{edit_id}", self.package_name)
    }

    async fn load_service_account(&self) -> Result<ServiceAccount, TesterError> {
        let raw = tokio::fs::read(&self.service_account_file)
            .await
            .map_err(|source| TesterError::CredentialsFile {
                path: self.service_account_file.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn access_token(&self) -> Result<String, TesterError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let account = self.load_service_account().await?;
        let token_uri = account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &account.client_email,
            scope: SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let response = check(response, "token exchange").await?;
        let token: TokenResponse = response.json().await?;

        // Refresh a minute early.
        let lifetime = token.expires_in.unwrap_or(3600).saturating_sub(60);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!("obtained Google Play access token");
        Ok(token.access_token)
    }
}

async fn check(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, TesterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TesterError::Api {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TesterClient for GooglePlayClient {
    async fn insert_edit(&self) -> Result<String, TesterError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{API_BASE}/{}/edits", self.package_name))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let edit: AppEdit = check(response, "edits.insert").await?.json().await?;
        Ok(edit.id)
    }

    async fn get_testers(&self, edit_id: &str, track: &str) -> Result<Vec<String>, TesterError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/testers/{track}", self.edit_url(edit_id)))
            .bearer_auth(token)
            .send()
            .await?;
        let testers: Testers = check(response, "edits.testers.get").await?.json().await?;
        Ok(testers.google_groups)
    }

    async fn update_testers(
        &self,
        edit_id: &str,
        track: &str,
        testers: &[String],
    ) -> Result<(), TesterError> {
        let token = self.access_token().await?;
        let body = Testers {
            google_groups: testers.to_vec(),
        };
        let response = self
            .http
            .put(format!("{}/testers/{track}", self.edit_url(edit_id)))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check(response, "edits.testers.update").await?;
        Ok(())
    }

    async fn commit_edit(&self, edit_id: &str) -> Result<(), TesterError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}:commit", self.edit_url(edit_id)))
            .bearer_auth(token)
            .send()
            .await?;
        check(response, "edits.commit").await?;
        Ok(())
    }

    async fn delete_edit(&self, edit_id: &str) -> Result<(), TesterError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .delete(self.edit_url(edit_id))
            .bearer_auth(token)
            .send()
            .await?;
        check(response, "edits.delete").await?;
        Ok(())
    }
}
