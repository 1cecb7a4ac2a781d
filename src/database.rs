// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The node's SQLite database.
//!
//! One pool is shared by the change journal, the checkpoint store and the
//! applier's change target, so a batch apply and the journal rows it writes
//! commit in the same transaction.
//!
//! # Tables
//!
//! ```text
//! sync_settings   key/value checkpoints (never journaled)
//! sync_journal    captured (origin = local) and applied (origin = remote)
//!                 change records
//! ```
//!
//! Change targets create their own tables
//! (see [`ChangeTarget::ensure_schema`](crate::target::ChangeTarget::ensure_schema)).
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Single-statement operations go through [`execute_with_retry`],
//! which retries with capped exponential backoff. Batch applies are not
//! retried here: a failed batch is reported to the coordinator.

use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS sync_settings (
        key TEXT PRIMARY KEY,
        value TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_journal (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id TEXT NOT NULL UNIQUE,
        position INTEGER NOT NULL,
        entity_id TEXT NOT NULL,
        change TEXT NOT NULL,
        status TEXT NOT NULL,
        origin TEXT NOT NULL DEFAULT 'local',
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_journal_status_position ON sync_journal (status, position)",
    "CREATE INDEX IF NOT EXISTS idx_sync_journal_position ON sync_journal (position)",
    "CREATE INDEX IF NOT EXISTS idx_sync_journal_origin_position ON sync_journal (origin, position)",
];

/// Check if an error is a retryable SQLite busy/locked error
pub(crate) fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
            // Extended codes (e.g. SQLITE_BUSY_SNAPSHOT = 517) keep the
            // primary code in the low byte.
            if let Some(code) = db_err.code().and_then(|c| c.parse::<i32>().ok()) {
                let primary = code & 0xff;
                return primary == 5 || primary == 6;
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
pub(crate) async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::storage_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Shared SQLite handle for one node.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: String,
}

impl Database {
    /// Open (creating if needed) the database described by `config` and
    /// bootstrap the sync tables.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        info!(path = %config.sqlite_path, "Opening sync database");

        let (options, pool_options) = if config.is_in_memory() {
            // Every connection to :memory: is a separate database, so keep
            // exactly one alive for the lifetime of the pool.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| SyncError::Config(format!("Invalid SQLite path: {}", e)))?;
            let pool_options = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (options, pool_options)
        } else {
            let options =
                SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", config.sqlite_path))
                    .map_err(|e| SyncError::Config(format!("Invalid SQLite path: {}", e)))?
                    .create_if_missing(true);
            let options = if config.wal_mode {
                options
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
            } else {
                options
            };
            let pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
            (options, pool_options)
        };

        let options = options.busy_timeout(config.busy_timeout_duration());

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| SyncError::storage("database_open", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| SyncError::storage("database_migrate", e))?;
        }

        debug!(path = %config.sqlite_path, "Sync tables ready");

        Ok(Self {
            pool,
            path: config.sqlite_path.clone(),
        })
    }

    /// Open a file-backed database with default settings.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        Self::open(&DatabaseConfig::at(path)).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::open(&DatabaseConfig::in_memory()).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    /// Retries on SQLITE_BUSY/SQLITE_LOCKED with exponential backoff.
    pub async fn wal_checkpoint(&self) -> Result<()> {
        let pool = &self.pool;

        execute_with_retry("wal_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await
        .map_err(|e| SyncError::storage("wal_checkpoint", e))?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        if let Err(e) = self.wal_checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!(path = %self.path, "Sync database closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_tables() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("node.db")).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'sync_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["sync_journal", "sync_settings"]);

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        let db = Database::open_path(&path).await.unwrap();
        db.close().await;

        let db = Database::open_path(&path).await.unwrap();
        assert!(db.path().contains("reopen.db"));
        db.close().await;
    }

    #[tokio::test]
    async fn test_in_memory_survives_across_queries() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query("INSERT INTO sync_settings (key, value, updated_at) VALUES ('k', 'v', 0)")
            .execute(db.pool())
            .await
            .unwrap();

        let (value,): (String,) = sqlx::query_as("SELECT value FROM sync_settings WHERE key = 'k'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(value, "v");
    }

    #[tokio::test]
    async fn test_wal_checkpoint() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("wal.db")).await.unwrap();
        assert!(db.wal_checkpoint().await.is_ok());
        db.close().await;
    }

    #[tokio::test]
    async fn test_write_retries_until_lock_holder_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let config = DatabaseConfig {
            busy_timeout: "0s".to_string(),
            ..DatabaseConfig::at(path.to_string_lossy())
        };
        let db = Database::open(&config).await.unwrap();

        let mut holder = db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();

        let insert = "INSERT INTO sync_settings (key, value, updated_at) VALUES ('k', 'v', 0)";
        let err = sqlx::query(insert).execute(db.pool()).await.unwrap_err();
        assert!(is_sqlite_busy_error(&err), "not a busy error: {:?}", err);

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        });

        let pool = db.pool().clone();
        let mut attempts = 0;
        let result = execute_with_retry("settings_write", || {
            attempts += 1;
            sqlx::query(insert).execute(&pool)
        })
        .await;
        release.await.unwrap();

        assert_eq!(result.unwrap().rows_affected(), 1);
        assert!(attempts > 1, "write never hit the lock");

        // A failure that is not about locking is returned at once
        let mut attempts = 0;
        let err = execute_with_retry("settings_write", || {
            attempts += 1;
            sqlx::query(insert).execute(&pool)
        })
        .await
        .unwrap_err();
        assert!(!is_sqlite_busy_error(&err));
        assert_eq!(attempts, 1);
        db.close().await;
    }
}
