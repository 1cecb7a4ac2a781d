// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for journal synchronization.
//!
//! Every failure that reaches a coordinator is a [`SyncError`]. The only
//! operations that "succeed by doing nothing" are the journal's
//! `get_deleted` / `apply_deleted`, and those are no-ops by contract,
//! not swallowed errors.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Format` | No | Persisted or transmitted watermark does not parse |
//! | `Storage` | Depends | SQLite failure in the checkpoint store or journal |
//! | `Apply` | Depends | A batch was rejected as a whole |
//! | `InvalidTransition` | No | Record status change the state machine forbids |
//! | `RecordNotFound` | No | Status change for an unknown record |
//! | `EntityConflict` | No | Change does not fit local entity state |
//! | `Payload` | No | Stored change payload is not valid JSON |
//! | `Config` | No | Configuration invalid |
//!
//! # Retry Behavior
//!
//! Use [`SyncError::is_retryable()`] to decide whether a coordinator should
//! retry the window with backoff. This crate never retries on its own beyond
//! SQLite busy handling.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Boxed cause attached to an apply failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while capturing, enumerating or applying changes.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A watermark string could not be parsed under the canonical format.
    ///
    /// Raised instead of substituting "absent": a corrupted checkpoint
    /// must never look like "never synced".
    #[error("Malformed watermark {value:?}: {reason}")]
    Format {
        value: String,
        reason: String,
        #[source]
        source: Option<chrono::ParseError>,
    },

    /// SQLite error in the checkpoint store or change journal.
    #[error("Storage error ({operation}): {source}")]
    Storage {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// A batch failed to commit. Nothing from the batch is visible.
    #[error("Apply failed at record {index} ({record_id}): {message}")]
    Apply {
        /// Position of the offending record inside the batch.
        index: usize,
        record_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The record status machine forbids this change.
    #[error("Invalid status transition for record {record_id}: {from} -> {to}")]
    InvalidTransition {
        record_id: String,
        from: String,
        to: String,
    },

    /// Status update for a record the journal does not hold.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A change does not fit the local entity state (insert of an existing
    /// entity, update or delete of a missing one).
    #[error("Entity conflict for {entity_id}: {message}")]
    EntityConflict { entity_id: String, message: String },

    /// Stored change payload could not be decoded.
    #[error("Payload error for record {record_id}: {source}")]
    Payload {
        record_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a format error for a raw watermark value.
    pub fn format(value: impl Into<String>, source: chrono::ParseError) -> Self {
        Self::Format {
            value: value.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a format error for a value that parses but is not written the
    /// way a watermark renders itself.
    pub fn non_canonical(value: impl Into<String>) -> Self {
        Self::Format {
            value: value.into(),
            reason: "not in canonical form YYYY-MM-DD HH:MM:SS.sss".to_string(),
            source: None,
        }
    }

    /// Create a storage error for a named operation.
    pub fn storage(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    /// Create an apply error without an underlying cause.
    pub fn apply(index: usize, record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Apply {
            index,
            record_id: record_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { source, .. } => is_transient(source),
            Self::Apply { source, .. } => match source.as_deref() {
                Some(cause) => {
                    if let Some(inner) = cause.downcast_ref::<SyncError>() {
                        inner.is_retryable()
                    } else if let Some(db) = cause.downcast_ref::<sqlx::Error>() {
                        is_transient(db)
                    } else {
                        false
                    }
                }
                None => false,
            },
            Self::Format { .. } => false, // Corrupt data, needs an operator
            Self::InvalidTransition { .. } => false,
            Self::RecordNotFound(_) => false,
            Self::EntityConflict { .. } => false,
            Self::Payload { .. } => false,
            Self::Config(_) => false,
        }
    }
}

/// Transient SQLite failures: busy/locked databases, pool exhaustion, I/O.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(_) => crate::database::is_sqlite_busy_error(e),
        _ => false,
    }
}
