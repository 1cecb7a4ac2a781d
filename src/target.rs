// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change target integration trait.
//!
//! A [`ChangeTarget`] is the local row storage that incoming changes are
//! replayed into. The applier hands it each record on the batch's open
//! SQLite transaction, so the target's writes commit or roll back together
//! with the rest of the batch.
//!
//! # Example
//!
//! ```rust,no_run
//! use journal_sync::target::{BoxFuture, ChangeTarget};
//! use journal_sync::SyncRecord;
//! use sqlx::sqlite::SqliteConnection;
//!
//! struct AuditLog;
//!
//! impl ChangeTarget for AuditLog {
//!     fn apply<'a>(
//!         &'a self,
//!         _conn: &'a mut SqliteConnection,
//!         record: &'a SyncRecord,
//!     ) -> BoxFuture<'a, ()> {
//!         Box::pin(async move {
//!             println!("{} {}", record.change.kind(), record.entity_id);
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::record::{Change, SyncRecord};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Local storage that replayed changes are written to.
///
/// Implementations must not commit or open their own transactions on
/// `conn`; the applier owns the transaction boundary.
pub trait ChangeTarget: Send + Sync + 'static {
    /// Create whatever tables the target writes to.
    ///
    /// Default implementation does nothing.
    fn ensure_schema<'a>(&'a self, _pool: &'a SqlitePool) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Replay one change.
    fn apply<'a>(&'a self, conn: &'a mut SqliteConnection, record: &'a SyncRecord) -> BoxFuture<'a, ()>;
}

/// Generic entity table: one JSON document per entity id.
///
/// | Change | Effect | Fails when |
/// |--------|--------|------------|
/// | `Insert` | new row | entity already exists |
/// | `Update` | replace document | entity missing |
/// | `Delete` | remove row | entity missing |
#[derive(Debug, Clone, Default)]
pub struct EntityTable;

impl EntityTable {
    pub fn new() -> Self {
        Self
    }

    /// Current document for an entity.
    pub async fn get(&self, pool: &SqlitePool, entity_id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM sync_entities WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| SyncError::storage("entity_get", e))?;

        row.map(|(data,)| {
            serde_json::from_str(&data).map_err(|e| SyncError::Payload {
                record_id: entity_id.to_string(),
                source: e,
            })
        })
        .transpose()
    }

    /// Number of live entities.
    pub async fn count(&self, pool: &SqlitePool) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_entities")
            .fetch_one(pool)
            .await
            .map_err(|e| SyncError::storage("entity_count", e))?;
        Ok(count.max(0) as u64)
    }

    async fn exists(conn: &mut SqliteConnection, entity_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sync_entities WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| SyncError::storage("entity_exists", e))?;
        Ok(row.is_some())
    }

    fn conflict(record: &SyncRecord, message: &str) -> SyncError {
        SyncError::EntityConflict {
            entity_id: record.entity_id.clone(),
            message: message.to_string(),
        }
    }
}

impl ChangeTarget for EntityTable {
    fn ensure_schema<'a>(&'a self, pool: &'a SqlitePool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS sync_entities (
                    entity_id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(pool)
            .await
            .map_err(|e| SyncError::storage("entity_schema", e))?;
            Ok(())
        })
    }

    fn apply<'a>(&'a self, conn: &'a mut SqliteConnection, record: &'a SyncRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let now = chrono::Utc::now().timestamp_millis();
            let exists = Self::exists(conn, &record.entity_id).await?;

            match &record.change {
                Change::Insert(data) => {
                    if exists {
                        return Err(Self::conflict(record, "insert of an existing entity"));
                    }
                    sqlx::query("INSERT INTO sync_entities (entity_id, data, updated_at) VALUES (?, ?, ?)")
                        .bind(&record.entity_id)
                        .bind(data.to_string())
                        .bind(now)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| SyncError::storage("entity_insert", e))?;
                }
                Change::Update(data) => {
                    if !exists {
                        return Err(Self::conflict(record, "update of a missing entity"));
                    }
                    sqlx::query("UPDATE sync_entities SET data = ?, updated_at = ? WHERE entity_id = ?")
                        .bind(data.to_string())
                        .bind(now)
                        .bind(&record.entity_id)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| SyncError::storage("entity_update", e))?;
                }
                Change::Delete => {
                    if !exists {
                        return Err(Self::conflict(record, "delete of a missing entity"));
                    }
                    sqlx::query("DELETE FROM sync_entities WHERE entity_id = ?")
                        .bind(&record.entity_id)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| SyncError::storage("entity_delete", e))?;
                }
            }

            tracing::trace!(
                entity_id = %record.entity_id,
                op = record.change.kind(),
                "Entity change replayed"
            );
            Ok(())
        })
    }
}

/// A no-op target for relay nodes and testing.
///
/// Logs each change but stores nothing. Records are still written to the
/// local journal as applied.
#[derive(Debug, Clone, Default)]
pub struct NoOpTarget;

impl ChangeTarget for NoOpTarget {
    fn apply<'a>(&'a self, _conn: &'a mut SqliteConnection, record: &'a SyncRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                record_id = %record.id,
                entity_id = %record.entity_id,
                op = record.change.kind(),
                "NoOp: would apply change"
            );
            Ok(())
        })
    }
}
