use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{AnalyticsRepository, HeartbeatUpsert, Page, StoreError, SubmissionRepository};
use crate::models::{AnalyticsRecord, Submission};

const SUBMISSION_COLUMNS: &str =
    "id, form_id, data, ip_address, user_agent, submitted_at, processed, processed_at, error";

/// Embedded single-file backend. `data` is stored as JSON text.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;
        Ok(())
    }
}

fn submission_from_row(row: &SqliteRow) -> Result<Submission, StoreError> {
    let raw: String = row.try_get("data")?;
    let data: Map<String, Value> = serde_json::from_str(&raw)?;
    let ip_address: Option<String> = row.try_get("ip_address")?;
    let user_agent: Option<String> = row.try_get("user_agent")?;

    Ok(Submission {
        id: row.try_get("id")?,
        form_id: row.try_get("form_id")?,
        data,
        ip_address: ip_address.unwrap_or_default(),
        user_agent: user_agent.unwrap_or_default(),
        submitted_at: row.try_get("submitted_at")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
        error: row.try_get("error")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<AnalyticsRecord, StoreError> {
    Ok(AnalyticsRecord {
        id: row.try_get("id")?,
        server_hash: row.try_get("server_hash")?,
        version: row.try_get("version")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        ip_hash: row.try_get("ip_hash")?,
    })
}

#[async_trait]
impl SubmissionRepository for SqliteStore {
    async fn insert(&self, submission: &Submission) -> Result<(), StoreError> {
        let data = serde_json::to_string(&submission.data)?;

        sqlx::query(
            r#"
            INSERT INTO form_submissions (
                id,
                form_id,
                data,
                ip_address,
                user_agent,
                submitted_at,
                processed,
                processed_at,
                error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&submission.id)
        .bind(&submission.form_id)
        .bind(data)
        .bind(&submission.ip_address)
        .bind(&submission.user_agent)
        .bind(submission.submitted_at)
        .bind(submission.processed)
        .bind(submission.processed_at)
        .bind(submission.error.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_processing(&self, submission: &Submission) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE form_submissions
            SET processed = ?,
                processed_at = ?,
                error = ?
            WHERE id = ?
            "#,
        )
        .bind(submission.processed)
        .bind(submission.processed_at)
        .bind(submission.error.as_deref())
        .bind(&submission.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(submission.id.clone()));
        }
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Submission, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM form_submissions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => submission_from_row(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn list(&self, form_id: Option<&str>, page: Page) -> Result<Vec<Submission>, StoreError> {
        let rows = match form_id {
            Some(form_id) => {
                sqlx::query(&format!(
                    "SELECT {SUBMISSION_COLUMNS} FROM form_submissions \
                     WHERE form_id = ? ORDER BY submitted_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(form_id)
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SUBMISSION_COLUMNS} FROM form_submissions \
                     ORDER BY submitted_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(submission_from_row).collect()
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM form_submissions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsRepository for SqliteStore {
    async fn upsert_heartbeat(
        &self,
        candidate_id: &str,
        server_hash: &str,
        version: &str,
        ip_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<HeartbeatUpsert, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO analytics_servers (id, server_hash, version, first_seen, last_seen, ip_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (server_hash) DO UPDATE SET
                version = excluded.version,
                last_seen = excluded.last_seen
            RETURNING id, server_hash, version, first_seen, last_seen, ip_hash
            "#,
        )
        .bind(candidate_id)
        .bind(server_hash)
        .bind(version)
        .bind(seen_at)
        .bind(seen_at)
        .bind(ip_hash)
        .fetch_one(&self.pool)
        .await?;

        let record = record_from_row(&row)?;
        let created = record.id == candidate_id;
        Ok(HeartbeatUpsert { record, created })
    }

    async fn count_all(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analytics_servers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analytics_servers WHERE last_seen > ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn version_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT version, COUNT(*) FROM analytics_servers WHERE last_seen > ? GROUP BY version",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_last_seen_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM analytics_servers WHERE last_seen < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
