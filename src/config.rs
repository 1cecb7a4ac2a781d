//! Configuration for a journal-backed sync source.
//!
//! Configuration is passed to [`JournalSource::open()`](crate::JournalSource::open)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use journal_sync::config::{SyncConfig, DatabaseConfig};
//!
//! let config = SyncConfig {
//!     node_id: "clinic-7".into(),
//!     database: DatabaseConfig::at("/var/lib/app/sync.db"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── node_id: String               # This node's id (logs, metrics)
//! ├── database: DatabaseConfig      # SQLite holding journal + checkpoints
//! ├── sync_point: SyncPointStrategy # How move_sync_point() allocates
//! └── apply: ApplyConfig            # Batch application limits
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "node_id": "clinic-7",
//!   "database": { "sqlite_path": "/var/lib/app/sync.db", "busy_timeout": "2s" },
//!   "sync_point": "journal_head",
//!   "apply": { "max_batch_size": 500 }
//! }
//! ```

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object for one node's sync source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identity of the local node. Used as a log and metrics label only.
    pub node_id: String,

    /// SQLite database holding the journal, checkpoints and applied entities.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// How the next capture window's upper bound is allocated.
    #[serde(default)]
    pub sync_point: SyncPointStrategy,

    /// Batch application settings.
    #[serde(default)]
    pub apply: ApplyConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_id: "local.dev.node.default".to_string(),
            database: DatabaseConfig::default(),
            sync_point: SyncPointStrategy::default(),
            apply: ApplyConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            database: DatabaseConfig::in_memory(),
            sync_point: SyncPointStrategy::default(),
            apply: ApplyConfig::default(),
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(SyncError::Config("node_id must not be empty".to_string()));
        }
        if self.database.sqlite_path.trim().is_empty() {
            return Err(SyncError::Config("database.sqlite_path must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(SyncError::Config("database.max_connections must be > 0".to_string()));
        }
        if humantime::parse_duration(&self.database.busy_timeout).is_err() {
            return Err(SyncError::Config(format!(
                "database.busy_timeout is not a duration: {:?}",
                self.database.busy_timeout
            )));
        }
        if self.apply.max_batch_size == 0 {
            return Err(SyncError::Config("apply.max_batch_size must be > 0".to_string()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DatabaseConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLite persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database, or `:memory:`.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Pool size. In-memory databases always use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before returning BUSY,
    /// as a duration string (e.g., "5s").
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: String,
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout() -> String {
    "5s".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "journal_sync.db".to_string(),
            wal_mode: true,
            max_connections: 4,
            busy_timeout: "5s".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// File-backed database at `path` with default settings.
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            sqlite_path: path.into(),
            ..Default::default()
        }
    }

    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
            max_connections: 1,
            busy_timeout: "5s".to_string(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path == ":memory:"
    }

    /// Parse the busy_timeout string to a Duration.
    pub fn busy_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.busy_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncPointStrategy
// ═══════════════════════════════════════════════════════════════════════════════

/// How `move_sync_point()` picks the upper bound of the next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPointStrategy {
    /// "Now", for journals whose positions are capture timestamps.
    #[default]
    WallClock,
    /// The highest position among locally captured records.
    JournalHead,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ApplyConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Largest batch accepted by `apply_changed`. Bigger batches are rejected
    /// whole, before anything is applied.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
