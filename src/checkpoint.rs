// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint persistence for sync watermarks.
//!
//! Stores the two watermarks a node tracks in the `sync_settings` table:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `last-sync-local` | how far local capture has been handed out |
//! | `last-sync-remote` | how far changes from the parent have been applied |
//!
//! Values are canonical watermark strings ([`WATERMARK_FORMAT`](crate::watermark::WATERMARK_FORMAT))
//! or NULL for "never synced".
//!
//! ## Checkpoint Semantics
//!
//! The checkpoint stores the upper bound of the **last successfully applied**
//! window. The coordinator writes it only after the apply committed:
//!
//! ```text
//! move_sync_point → get_changed → apply_changed → set_last_sync_remote
//!                                   (crash here = re-fetch, idempotent)
//! ```
//!
//! ## Isolation
//!
//! Writes go straight to `sync_settings`. They never pass through the change
//! journal, otherwise every checkpoint write would itself be captured as a
//! change and the node would replicate its own bookkeeping forever.
//!
//! ## Corruption
//!
//! A stored value that fails to parse is an error, for both keys. Treating it
//! as "absent" would silently re-capture history from epoch start.

use crate::database::{execute_with_retry, Database};
use crate::error::{Result, SyncError};
use crate::watermark::Watermark;
use sqlx::sqlite::SqlitePool;
use std::fmt;
use tracing::{debug, error};

/// The two persisted checkpoint keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKey {
    LastSyncLocal,
    LastSyncRemote,
}

impl CheckpointKey {
    /// Persisted key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKey::LastSyncLocal => "last-sync-local",
            CheckpointKey::LastSyncRemote => "last-sync-remote",
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent checkpoint storage backed by SQLite.
///
/// Write-through: a read always reflects the latest completed write on
/// this node.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    /// Create a checkpoint store on the node's database.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Last point up to which local changes were captured.
    pub async fn get_local(&self) -> Result<Option<Watermark>> {
        self.get(CheckpointKey::LastSyncLocal).await
    }

    pub async fn set_local(&self, value: Option<&Watermark>) -> Result<()> {
        self.set(CheckpointKey::LastSyncLocal, value).await
    }

    /// Last point up to which remote changes were received.
    pub async fn get_remote(&self) -> Result<Option<Watermark>> {
        self.get(CheckpointKey::LastSyncRemote).await
    }

    pub async fn set_remote(&self, value: Option<&Watermark>) -> Result<()> {
        self.set(CheckpointKey::LastSyncRemote, value).await
    }

    /// Read and parse a checkpoint.
    ///
    /// Returns `None` if the key was never written, or was written as absent.
    ///
    /// # Errors
    ///
    /// [`SyncError::Format`] if the stored value is not a canonical watermark.
    pub async fn get(&self, key: CheckpointKey) -> Result<Option<Watermark>> {
        match self.get_raw(key).await?.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => match Watermark::parse(raw) {
                Ok(watermark) => Ok(Some(watermark)),
                Err(e) => {
                    error!(key = %key, value = %raw, "Stored checkpoint is not a valid watermark");
                    crate::metrics::record_checkpoint_corrupt(key.as_str());
                    Err(e)
                }
            },
        }
    }

    /// Persist a checkpoint, or clear it with `None`.
    pub async fn set(&self, key: CheckpointKey, value: Option<&Watermark>) -> Result<()> {
        let raw = value.map(Watermark::format);
        self.set_raw(key, raw.as_deref()).await?;
        debug!(key = %key, value = ?raw, "Checkpoint updated");
        Ok(())
    }

    /// The stored string, unparsed (for diagnostics).
    pub async fn get_raw(&self, key: CheckpointKey) -> Result<Option<String>> {
        let pool = &self.pool;

        let row: Option<(Option<String>,)> = execute_with_retry("checkpoint_get", || async {
            sqlx::query_as("SELECT value FROM sync_settings WHERE key = ?")
                .bind(key.as_str())
                .fetch_optional(pool)
                .await
        })
        .await
        .map_err(|e| SyncError::storage("checkpoint_get", e))?;

        Ok(row.and_then(|(value,)| value))
    }

    /// Store a raw string without validation.
    ///
    /// For operator repair of a corrupted checkpoint; normal writes go
    /// through [`set`](Self::set).
    pub async fn set_raw(&self, key: CheckpointKey, value: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let pool = &self.pool;

        let result = execute_with_retry("checkpoint_set", || async {
            sqlx::query(
                r#"
                INSERT INTO sync_settings (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key.as_str())
            .bind(value)
            .bind(now)
            .execute(pool)
            .await
        })
        .await;

        crate::metrics::record_checkpoint_write(key.as_str(), result.is_ok());
        result.map_err(|e| SyncError::storage("checkpoint_set", e))?;
        Ok(())
    }

    /// Reset both checkpoints to "never synced".
    pub async fn clear(&self) -> Result<()> {
        self.set(CheckpointKey::LastSyncLocal, None).await?;
        self.set(CheckpointKey::LastSyncRemote, None).await
    }
}
