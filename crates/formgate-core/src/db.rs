use std::sync::Arc;

use tracing::info;

use crate::config::{DatabaseConfig, DatabaseKind};
use crate::store::{AnalyticsRepository, PostgresStore, SqliteStore, StoreError, SubmissionRepository};

#[derive(Clone)]
enum Backend {
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
}

/// The storage backend chosen at startup. Everything past this point only
/// sees the repository traits.
#[derive(Clone)]
pub struct Database {
    backend: Backend,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let backend = match config.kind {
            DatabaseKind::Sqlite => {
                info!(path = %config.path.display(), "opening SQLite database");
                Backend::Sqlite(SqliteStore::connect(&config.path, config.max_connections).await?)
            }
            DatabaseKind::Postgres => {
                info!(host = %config.host, database = %config.name, "connecting to Postgres");
                Backend::Postgres(PostgresStore::connect(config).await?)
            }
        };
        Ok(Self { backend })
    }

    pub fn from_sqlite(store: SqliteStore) -> Self {
        Self {
            backend: Backend::Sqlite(store),
        }
    }

    pub fn from_postgres(store: PostgresStore) -> Self {
        Self {
            backend: Backend::Postgres(store),
        }
    }

    pub fn kind(&self) -> DatabaseKind {
        match self.backend {
            Backend::Sqlite(_) => DatabaseKind::Sqlite,
            Backend::Postgres(_) => DatabaseKind::Postgres,
        }
    }

    /// Run the embedded migrations for the active backend.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Sqlite(store) => store.run_migrations().await,
            Backend::Postgres(store) => store.run_migrations().await,
        }
    }

    pub fn submissions(&self) -> Arc<dyn SubmissionRepository> {
        match &self.backend {
            Backend::Sqlite(store) => Arc::new(store.clone()),
            Backend::Postgres(store) => Arc::new(store.clone()),
        }
    }

    pub fn analytics(&self) -> Arc<dyn AnalyticsRepository> {
        match &self.backend {
            Backend::Sqlite(store) => Arc::new(store.clone()),
            Backend::Postgres(store) => Arc::new(store.clone()),
        }
    }
}
