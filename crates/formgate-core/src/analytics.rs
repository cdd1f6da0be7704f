//! Heartbeat analytics: signed check-ins from remote installations, one row
//! per `server_hash`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{timestamp_now, AnalyticsSummary, HeartbeatRequest};
use crate::security::constant_time_eq_str;
use crate::store::{AnalyticsRepository, HeartbeatUpsert, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const ACTIVE_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("retention must be a positive number of days, got {0}")]
    InvalidRetention(i64),
}

/// Lowercase hex HMAC-SHA256 of `server_hash + version + source_ip`.
pub fn sign(secret: &[u8], server_hash: &str, version: &str, source_ip: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(server_hash.as_bytes());
    mac.update(version.as_bytes());
    mac.update(source_ip.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// One-way hash stored in place of the caller's address.
pub fn hash_ip(source_ip: &str) -> String {
    hex::encode(Sha256::digest(source_ip.as_bytes()))
}

fn short_hash(server_hash: &str) -> String {
    server_hash.chars().take(8).collect()
}

pub struct AnalyticsRegister {
    repository: Arc<dyn AnalyticsRepository>,
    secret: Vec<u8>,
}

impl AnalyticsRegister {
    pub fn new(repository: Arc<dyn AnalyticsRepository>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            repository,
            secret: secret.into(),
        }
    }

    /// Never errors; any mismatch is just `false`.
    pub fn verify_signature(&self, request: &HeartbeatRequest, source_ip: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let expected = sign(&self.secret, &request.server_hash, &request.version, source_ip);
        !expected.is_empty() && constant_time_eq_str(&request.signature, &expected)
    }

    pub async fn ingest(
        &self,
        request: &HeartbeatRequest,
        source_ip: &str,
    ) -> Result<HeartbeatUpsert, AnalyticsError> {
        self.ingest_at(request, source_ip, timestamp_now()).await
    }

    pub async fn ingest_at(
        &self,
        request: &HeartbeatRequest,
        source_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatUpsert, AnalyticsError> {
        let candidate_id = Uuid::new_v4().to_string();
        let upsert = self
            .repository
            .upsert_heartbeat(
                &candidate_id,
                &request.server_hash,
                &request.version,
                &hash_ip(source_ip),
                now,
            )
            .await?;

        if upsert.created {
            info!(
                server = %short_hash(&request.server_hash),
                version = %request.version,
                "new server registered"
            );
        } else {
            info!(
                server = %short_hash(&request.server_hash),
                version = %request.version,
                "server check-in"
            );
        }
        Ok(upsert)
    }

    pub async fn summarize(&self) -> Result<AnalyticsSummary, AnalyticsError> {
        self.summarize_at(timestamp_now()).await
    }

    pub async fn summarize_at(&self, now: DateTime<Utc>) -> Result<AnalyticsSummary, AnalyticsError> {
        let active_since = now - Duration::days(ACTIVE_WINDOW_DAYS);

        let total_count = self.repository.count_all().await?;
        let active_count = self.repository.count_active_since(active_since).await?;
        let version_breakdown: BTreeMap<String, i64> = self
            .repository
            .version_counts_since(active_since)
            .await?
            .into_iter()
            .collect();

        Ok(AnalyticsSummary {
            total_count,
            active_count,
            version_breakdown,
            as_of: now,
        })
    }

    /// Removes servers not seen for `retention_days`; returns how many.
    pub async fn sweep(&self, retention_days: i64) -> Result<u64, AnalyticsError> {
        self.sweep_at(retention_days, timestamp_now()).await
    }

    pub async fn sweep_at(&self, retention_days: i64, now: DateTime<Utc>) -> Result<u64, AnalyticsError> {
        if retention_days <= 0 {
            return Err(AnalyticsError::InvalidRetention(retention_days));
        }
        let cutoff = now - Duration::days(retention_days);
        let removed = self.repository.delete_last_seen_before(cutoff).await?;
        info!(removed, retention_days, "cleaned up inactive servers");
        Ok(removed)
    }
}
