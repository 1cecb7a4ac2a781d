// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The change journal.
//!
//! An append-structured log of [`SyncRecord`]s stored in `sync_journal`.
//! The local capture mechanism appends; coordinators enumerate windows and
//! report status back.
//!
//! # Window Query
//!
//! ```text
//! changed_since(from, to):
//!     from < position <= to          (from = None → unbounded below)
//!     status ∈ {NEW, FAILED}
//!     ORDER BY position, seq         (capture order on ties)
//! ```
//!
//! Ordering is load-bearing: inserts, updates and deletes of one entity must
//! be replayed in the order they were captured.
//!
//! # Deletes
//!
//! Deletions are inline `Delete` records, so [`ChangeJournal::deleted_since`]
//! always returns an empty list.
//!
//! # Physical Rows
//!
//! Rows are never removed by this crate. Records reach `APPLIED` and stay.
//! Each row remembers its origin: `local` for captures, `remote` for records
//! the applier received from the peer. Only local rows count towards
//! [`ChangeJournal::head`].

use crate::database::{execute_with_retry, Database};
use crate::error::{Result, SyncError};
use crate::record::{Change, RecordStatus, SyncRecord};
use crate::watermark::Watermark;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

/// Raw `sync_journal` row.
#[derive(sqlx::FromRow)]
struct JournalRow {
    record_id: String,
    position: i64,
    entity_id: String,
    change: String,
    status: String,
}

impl JournalRow {
    fn decode(self) -> Result<SyncRecord> {
        let position = Watermark::from_millis(self.position).ok_or_else(|| {
            SyncError::storage(
                "journal_decode",
                sqlx::Error::Decode(format!("position out of range: {}", self.position).into()),
            )
        })?;
        let status = decode_status("journal_decode", &self.status)?;
        let change: Change = serde_json::from_str(&self.change).map_err(|e| SyncError::Payload {
            record_id: self.record_id.clone(),
            source: e,
        })?;

        Ok(SyncRecord {
            id: self.record_id,
            position,
            entity_id: self.entity_id,
            change,
            status,
        })
    }
}

fn decode_status(operation: &str, raw: &str) -> Result<RecordStatus> {
    RecordStatus::parse(raw).ok_or_else(|| {
        SyncError::storage(
            operation,
            sqlx::Error::Decode(format!("unknown status: {}", raw).into()),
        )
    })
}

fn encode_change(record: &SyncRecord) -> Result<String> {
    serde_json::to_string(&record.change).map_err(|e| SyncError::Payload {
        record_id: record.id.clone(),
        source: e,
    })
}

/// Per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub new: u64,
    pub sent: u64,
    pub failed: u64,
    pub applied: u64,
}

impl JournalStats {
    /// Records that the next window would pick up (ignoring bounds).
    pub fn pending(&self) -> u64 {
        self.new + self.failed
    }

    pub fn total(&self) -> u64 {
        self.new + self.sent + self.failed + self.applied
    }
}

/// Journal of captured changes backed by SQLite.
#[derive(Clone)]
pub struct ChangeJournal {
    pool: SqlitePool,
}

impl ChangeJournal {
    /// Create a journal on the node's database.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Append a captured change.
    ///
    /// This is the entry point for the local mutation capture mechanism.
    /// A record id that is already present is rejected.
    #[instrument(skip(self, record), fields(record_id = %record.id, entity_id = %record.entity_id))]
    pub async fn append(&self, record: &SyncRecord) -> Result<()> {
        let change = encode_change(record)?;
        let now = chrono::Utc::now().timestamp_millis();
        let pool = &self.pool;

        execute_with_retry("journal_append", || async {
            sqlx::query(
                r#"
                INSERT INTO sync_journal (record_id, position, entity_id, change, status, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(record.position.as_millis())
            .bind(&record.entity_id)
            .bind(&change)
            .bind(record.status.as_str())
            .bind(now)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| SyncError::storage("journal_append", e))?;

        debug!(op = record.change.kind(), position = %record.position, "Change captured");
        crate::metrics::record_journal_append(record.change.kind());
        Ok(())
    }

    /// Pending records in the window `(from, to]`, in capture order.
    ///
    /// Returns an empty list (never an error) when nothing matches,
    /// including when `from` is not below `to`.
    #[instrument(skip_all, fields(from = ?from.map(Watermark::format), to = %to))]
    pub async fn changed_since(
        &self,
        from: Option<&Watermark>,
        to: &Watermark,
    ) -> Result<Vec<SyncRecord>> {
        // Positions are chrono-range millis, so i64::MIN is strictly below all of them.
        let lower = from.map_or(i64::MIN, Watermark::as_millis);
        let upper = to.as_millis();
        let pool = &self.pool;

        let rows: Vec<JournalRow> = execute_with_retry("journal_changed_since", || async {
            sqlx::query_as(
                r#"
                SELECT record_id, position, entity_id, change, status
                FROM sync_journal
                WHERE position > ? AND position <= ? AND status IN ('NEW', 'FAILED')
                ORDER BY position ASC, seq ASC
                "#,
            )
            .bind(lower)
            .bind(upper)
            .fetch_all(pool)
            .await
        })
        .await
        .map_err(|e| SyncError::storage("journal_changed_since", e))?;

        let records = rows
            .into_iter()
            .map(JournalRow::decode)
            .collect::<Result<Vec<_>>>()?;

        debug!(count = records.len(), "Enumerated changed records");
        crate::metrics::record_changes_enumerated(records.len());
        Ok(records)
    }

    /// Deleted records in the window. Always empty: the journal carries
    /// deletions inline and [`changed_since`](Self::changed_since) returns them.
    pub async fn deleted_since(
        &self,
        _from: Option<&Watermark>,
        _to: &Watermark,
    ) -> Result<Vec<SyncRecord>> {
        Ok(Vec::new())
    }

    /// Look up a record by id.
    pub async fn get(&self, record_id: &str) -> Result<Option<SyncRecord>> {
        let pool = &self.pool;

        let row: Option<JournalRow> = execute_with_retry("journal_get", || async {
            sqlx::query_as(
                "SELECT record_id, position, entity_id, change, status FROM sync_journal WHERE record_id = ?",
            )
            .bind(record_id)
            .fetch_optional(pool)
            .await
        })
        .await
        .map_err(|e| SyncError::storage("journal_get", e))?;

        row.map(JournalRow::decode).transpose()
    }

    /// Move every listed record to `status`.
    ///
    /// All-or-nothing: if any id is unknown or any transition is illegal,
    /// no record changes. Re-asserting a record's current status is a no-op.
    /// Returns the number of records whose status actually changed.
    #[instrument(skip_all, fields(count = record_ids.len(), status = %status))]
    pub async fn transition(&self, record_ids: &[String], status: RecordStatus) -> Result<usize> {
        if record_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::storage("journal_transition", e))?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut changed = 0;

        for record_id in record_ids {
            let current = status_of(&mut *tx, record_id)
                .await?
                .ok_or_else(|| SyncError::RecordNotFound(record_id.clone()))?;

            if !current.can_transition_to(status) {
                return Err(SyncError::InvalidTransition {
                    record_id: record_id.clone(),
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            if current == status {
                continue;
            }

            sqlx::query("UPDATE sync_journal SET status = ?, updated_at = ? WHERE record_id = ?")
                .bind(status.as_str())
                .bind(now)
                .bind(record_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| SyncError::storage("journal_transition", e))?;
            changed += 1;
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::storage("journal_transition", e))?;

        debug!(changed, "Record statuses updated");
        crate::metrics::record_status_transitions(status.as_str(), changed);
        Ok(changed)
    }

    /// Highest position among locally captured records, or `None` when
    /// nothing was captured yet.
    ///
    /// Records applied from the peer carry the peer's positions and are
    /// left out.
    pub async fn head(&self) -> Result<Option<Watermark>> {
        let pool = &self.pool;

        let (max,): (Option<i64>,) = execute_with_retry("journal_head", || async {
            sqlx::query_as("SELECT MAX(position) FROM sync_journal WHERE origin = 'local'")
                .fetch_one(pool)
                .await
        })
        .await
        .map_err(|e| SyncError::storage("journal_head", e))?;

        Ok(max.and_then(Watermark::from_millis))
    }

    /// Record counts per status.
    pub async fn stats(&self) -> Result<JournalStats> {
        let pool = &self.pool;

        let rows: Vec<(String, i64)> = execute_with_retry("journal_stats", || async {
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_journal GROUP BY status")
                .fetch_all(pool)
                .await
        })
        .await
        .map_err(|e| SyncError::storage("journal_stats", e))?;

        let mut stats = JournalStats::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match RecordStatus::parse(&status) {
                Some(RecordStatus::New) => stats.new = count,
                Some(RecordStatus::Sent) => stats.sent = count,
                Some(RecordStatus::Failed) => stats.failed = count,
                Some(RecordStatus::Applied) => stats.applied = count,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Total number of records.
    pub async fn len(&self) -> Result<u64> {
        Ok(self.stats().await?.total())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Current status of a record, read on an open connection or transaction.
pub(crate) async fn status_of(
    conn: &mut SqliteConnection,
    record_id: &str,
) -> Result<Option<RecordStatus>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM sync_journal WHERE record_id = ?")
        .bind(record_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| SyncError::storage("journal_status", e))?;

    row.map(|(status,)| decode_status("journal_status", &status))
        .transpose()
}

/// Write a record received from the peer as `APPLIED`, origin `remote`.
///
/// Runs on the applier's transaction so the journal row and the replayed
/// change commit together. The caller has already checked that the id is
/// not in the journal.
pub(crate) async fn record_applied(conn: &mut SqliteConnection, record: &SyncRecord) -> Result<()> {
    let change = encode_change(record)?;
    let now = chrono::Utc::now().timestamp_millis();

    sqlx::query(
        r#"
        INSERT INTO sync_journal (record_id, position, entity_id, change, status, origin, updated_at)
        VALUES (?, ?, ?, ?, 'APPLIED', 'remote', ?)
        "#,
    )
    .bind(&record.id)
    .bind(record.position.as_millis())
    .bind(&record.entity_id)
    .bind(&change)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| SyncError::storage("journal_record_applied", e))?;

    Ok(())
}
