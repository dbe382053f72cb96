//! # Replication Database
//!
//! SQLite pool for the instance registry and the sync state tracker.
//!
//! - **WAL Mode** for file-backed databases
//! - **Embedded migrations** from `migrations/`, applied on open
//!
//! In-memory databases are private to a connection, so [`DatabaseConfig::in_memory`]
//! pins the pool to a single long-lived connection.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Keep connections forever; required for in-memory databases
    pub pinned: bool,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            pinned: false,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            pinned: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Open the pool and apply pending migrations.
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(database_url = %config.database_url, "Opening replication database");

    let mut options = SqliteConnectOptions::from_str(&config.database_url)?
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);
    if !config.pinned {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if config.pinned {
        pool_options = pool_options
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(error = %e, "Failed to open replication database");
        SyncError::Database(e.to_string())
    })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| SyncError::Database(format!("migration failed: {e}")))?;

    Ok(pool)
}

/// In-memory database with the schema applied.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_has_schema() {
        let pool = create_test_pool().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('instances', 'sync_status') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["instances".to_string(), "sync_status".to_string()]);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = std::env::temp_dir().join(format!("kiosk-db-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("replication.db");

        {
            let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
            sqlx::query("INSERT INTO instances (id, name, base_url, created_at) VALUES ('i1', 'Loja2', 'https://10.0.0.5/api', 0)")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        pool.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
