//! Submission and analytics persistence.
//!
//! Callers work against [`SubmissionRepository`] and [`AnalyticsRepository`];
//! the SQLite and Postgres adapters differ only in placeholder syntax and in
//! how the `data` column is typed.

mod backup;
pub mod postgres;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AnalyticsRecord, Submission};

pub use backup::BackupWriter;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("failed to encode submission data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("submission '{0}' not found")]
    NotFound(String),
}

/// Listing window. Out-of-range requests fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = match offset {
            Some(offset) if offset >= 0 => offset,
            _ => 0,
        };
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Result of a heartbeat upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatUpsert {
    pub record: AnalyticsRecord,
    /// True when this heartbeat created the row.
    pub created: bool,
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn insert(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Rewrites `processed`, `processed_at` and `error` for `submission.id`.
    async fn update_processing(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn fetch(&self, id: &str) -> Result<Submission, StoreError>;

    /// Newest first. `form_id = None` lists every form.
    async fn list(&self, form_id: Option<&str>, page: Page) -> Result<Vec<Submission>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Insert-or-update keyed on `server_hash`. An existing row only gets a
    /// new `version` and `last_seen`.
    async fn upsert_heartbeat(
        &self,
        candidate_id: &str,
        server_hash: &str,
        version: &str,
        ip_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<HeartbeatUpsert, StoreError>;

    async fn count_all(&self) -> Result<i64, StoreError>;

    /// Rows with `last_seen` strictly after `since`.
    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn version_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Deletes rows with `last_seen` strictly before `cutoff`.
    async fn delete_last_seen_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Submission persistence plus the out-of-band JSON backup copy.
#[derive(Clone)]
pub struct SubmissionStore {
    repository: Arc<dyn SubmissionRepository>,
    backup: BackupWriter,
}

impl SubmissionStore {
    pub fn new(repository: Arc<dyn SubmissionRepository>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            backup: BackupWriter::new(storage_root),
        }
    }

    pub fn backup(&self) -> &BackupWriter {
        &self.backup
    }

    /// Assigns an id when the submission has none, writes the row, then the
    /// backup file. Backup failures are logged and otherwise ignored.
    pub async fn create(&self, submission: &mut Submission) -> Result<String, StoreError> {
        if submission.id.is_empty() {
            submission.id = Uuid::new_v4().to_string();
        }

        self.repository.insert(submission).await?;
        debug!(submission_id = %submission.id, form_id = %submission.form_id, "submission stored");

        if let Err(err) = self.backup.write(submission).await {
            warn!(
                submission_id = %submission.id,
                error = %err,
                "failed to write submission backup file"
            );
        }

        Ok(submission.id.clone())
    }

    pub async fn update(&self, submission: &Submission) -> Result<(), StoreError> {
        self.repository.update_processing(submission).await
    }

    pub async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        self.repository.fetch(id).await
    }

    pub async fn list(&self, form_id: Option<&str>, page: Page) -> Result<Vec<Submission>, StoreError> {
        self.repository.list(form_id, page).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.repository.delete(id).await
    }
}
