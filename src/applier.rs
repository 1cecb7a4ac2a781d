// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch application of remote changes.
//!
//! # Design
//!
//! ```text
//! apply_changed([r0, r1, ... rn])
//!        │
//!        ▼
//!   BEGIN ──┬──▶ r_i already APPLIED in local journal? ──yes──▶ skip
//!           │                    │ no; id held by a local capture ──▶ error
//!           │                    │ unknown id
//!           │                    ▼
//!           │        ChangeTarget::apply(r_i)      (same transaction)
//!           │                    │
//!           │                    ▼
//!           │        journal row r_i = APPLIED     (same transaction)
//!           │
//!           ├── any error ──▶ ROLLBACK, Err(Apply { index, record_id })
//!           ▼
//!        COMMIT
//! ```
//!
//! - **Order**: records are replayed exactly as supplied. The sender has
//!   already interleaved inserts, updates and deletes causally.
//! - **Atomicity**: one SQLite transaction per batch. A failure on any record
//!   leaves no trace of the batch.
//! - **Idempotence**: the local journal doubles as the ledger of applied
//!   record ids, so a retried batch is a no-op for records already applied.
//!   Because applied records are stored as `APPLIED`, they are never
//!   enumerated again and never echo back to the sender.

use crate::config::ApplyConfig;
use crate::database::Database;
use crate::error::{Result, SyncError};
use crate::journal::{record_applied, status_of};
use crate::record::{RecordStatus, SyncRecord};
use crate::target::ChangeTarget;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Result of applying a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Records replayed into the target by this call.
    pub applied: usize,
    /// Records skipped because they were already applied.
    pub skipped: usize,
}

impl ApplyOutcome {
    pub fn total(&self) -> usize {
        self.applied + self.skipped
    }
}

/// Applies ordered batches of remote records to a [`ChangeTarget`].
pub struct ChangeApplier<T: ChangeTarget> {
    pool: SqlitePool,
    target: Arc<T>,
    config: ApplyConfig,
    /// Node ID (for logging).
    node_id: String,
}

impl<T: ChangeTarget> ChangeApplier<T> {
    /// Create an applier and make sure the target's tables exist.
    pub async fn new(
        db: &Database,
        target: Arc<T>,
        config: ApplyConfig,
        node_id: impl Into<String>,
    ) -> Result<Self> {
        target.ensure_schema(db.pool()).await?;
        Ok(Self {
            pool: db.pool().clone(),
            target,
            config,
            node_id: node_id.into(),
        })
    }

    /// The change target.
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Apply a batch in the supplied order, all or nothing.
    ///
    /// # Errors
    ///
    /// [`SyncError::Apply`] naming the first record that failed. Nothing from
    /// the batch is visible afterwards.
    #[instrument(skip_all, fields(node_id = %self.node_id, batch_size = records.len()))]
    pub async fn apply_changed(&self, records: &[SyncRecord]) -> Result<ApplyOutcome> {
        if records.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        if records.len() > self.config.max_batch_size {
            let first_over = &records[self.config.max_batch_size];
            crate::metrics::record_apply_failure(&self.node_id, "batch_too_large");
            return Err(SyncError::apply(
                self.config.max_batch_size,
                first_over.id.clone(),
                format!(
                    "batch of {} records exceeds max_batch_size {}",
                    records.len(),
                    self.config.max_batch_size
                ),
            ));
        }

        let start = Instant::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::storage("apply_begin", e))?;

        match self.apply_in(&mut *tx, records).await {
            Ok(outcome) => {
                tx.commit().await.map_err(|e| {
                    crate::metrics::record_apply_failure(&self.node_id, "commit");
                    let last = records.len() - 1;
                    SyncError::Apply {
                        index: last,
                        record_id: records[last].id.clone(),
                        message: "batch commit failed".to_string(),
                        source: Some(Box::new(e)),
                    }
                })?;

                info!(
                    node_id = %self.node_id,
                    applied = outcome.applied,
                    skipped = outcome.skipped,
                    "Batch applied"
                );
                crate::metrics::record_batch_applied(
                    &self.node_id,
                    outcome.applied,
                    outcome.skipped,
                    start.elapsed(),
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed; transaction dropped");
                }
                warn!(node_id = %self.node_id, error = %e, "Batch rejected, rolled back");
                crate::metrics::record_apply_failure(&self.node_id, "record");
                Err(e)
            }
        }
    }

    async fn apply_in(
        &self,
        conn: &mut SqliteConnection,
        records: &[SyncRecord],
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        for (index, record) in records.iter().enumerate() {
            let status = status_of(conn, &record.id)
                .await
                .map_err(|e| rejected(index, record, "journal lookup failed", e))?;

            match status {
                Some(RecordStatus::Applied) => {
                    debug!(record_id = %record.id, "Skipping (already applied)");
                    outcome.skipped += 1;
                    continue;
                }
                Some(local) => {
                    return Err(SyncError::apply(
                        index,
                        record.id.clone(),
                        format!("record id already captured locally (status {})", local),
                    ));
                }
                None => {}
            }

            self.target
                .apply(conn, record)
                .await
                .map_err(|e| rejected(index, record, "change rejected by target", e))?;

            record_applied(conn, record)
                .await
                .map_err(|e| rejected(index, record, "journal write failed", e))?;

            outcome.applied += 1;
        }

        Ok(outcome)
    }

    /// Accept deleted records and ignore them.
    ///
    /// Deletions reach a journal source inline through
    /// [`apply_changed`](Self::apply_changed). Any slice, empty or not, is
    /// accepted so this stays substitutable with sources that deliver
    /// deletions separately.
    pub async fn apply_deleted(&self, records: &[SyncRecord]) -> Result<()> {
        if !records.is_empty() {
            debug!(
                node_id = %self.node_id,
                count = records.len(),
                "Ignoring separately delivered deletions (journal carries them inline)"
            );
        }
        Ok(())
    }
}

fn rejected(index: usize, record: &SyncRecord, message: &str, cause: SyncError) -> SyncError {
    SyncError::Apply {
        index,
        record_id: record.id.clone(),
        message: format!("{}: {}", message, cause),
        source: Some(Box::new(cause)),
    }
}
