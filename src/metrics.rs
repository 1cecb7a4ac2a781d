//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Journal capture and enumeration
//! - Record status transitions
//! - Batch application
//! - Checkpoint writes and corruption
//! - SQLite busy retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `journal_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Histograms track distributions (duration, size)
//!
//! Nothing is exported unless the host installs a `metrics` recorder.
//!
//! # Usage
//!
//! ```rust,no_run
//! use journal_sync::metrics;
//! use std::time::Duration;
//!
//! // After a batch committed
//! metrics::record_batch_applied("clinic-7", 40, 2, Duration::from_millis(12));
//! ```

use metrics::{counter, histogram};
use std::time::Duration;

// =============================================================================
// Journal Metrics
// =============================================================================

/// Record a locally captured change.
pub fn record_journal_append(op: &str) {
    counter!("journal_sync_journal_appends_total", "op" => op.to_string()).increment(1);
}

/// Record records handed out by a window enumeration.
pub fn record_changes_enumerated(count: usize) {
    counter!("journal_sync_windows_enumerated_total").increment(1);
    counter!("journal_sync_changes_enumerated_total").increment(count as u64);
    histogram!("journal_sync_window_size").record(count as f64);
}

/// Record records moved to a new delivery status.
pub fn record_status_transitions(status: &str, count: usize) {
    if count > 0 {
        counter!("journal_sync_status_transitions_total", "status" => status.to_string())
            .increment(count as u64);
    }
}

// =============================================================================
// Apply Metrics
// =============================================================================

/// Record a committed batch.
pub fn record_batch_applied(node_id: &str, applied: usize, skipped: usize, duration: Duration) {
    let node = node_id.to_string();

    counter!("journal_sync_batches_applied_total", "node_id" => node.clone()).increment(1);
    counter!("journal_sync_records_applied_total", "node_id" => node.clone())
        .increment(applied as u64);
    if skipped > 0 {
        counter!("journal_sync_records_skipped_total", "node_id" => node.clone())
            .increment(skipped as u64);
    }

    histogram!("journal_sync_apply_duration_seconds", "node_id" => node.clone())
        .record(duration.as_secs_f64());
    histogram!("journal_sync_batch_size", "node_id" => node).record((applied + skipped) as f64);
}

/// Record a rejected batch.
pub fn record_apply_failure(node_id: &str, reason: &str) {
    counter!(
        "journal_sync_apply_failures_total",
        "node_id" => node_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// =============================================================================
// Checkpoint Metrics
// =============================================================================

/// Record a checkpoint write.
pub fn record_checkpoint_write(key: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("journal_sync_checkpoint_writes_total", "key" => key.to_string(), "status" => status)
        .increment(1);
}

/// Record a stored checkpoint that failed to parse.
pub fn record_checkpoint_corrupt(key: &str) {
    counter!("journal_sync_checkpoint_corrupt_total", "key" => key.to_string()).increment(1);
}

// =============================================================================
// Storage Metrics
// =============================================================================

/// Record a SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn storage_retries_total(operation: &str) {
    counter!("journal_sync_storage_retries_total", "operation" => operation.to_string()).increment(1);
}
