//! # Journal Sync
//!
//! Journal-based change replication between a parent and a child node.
//!
//! ## Architecture
//!
//! Each node keeps a local SQLite database holding its change journal, its
//! two sync checkpoints and the entities replayed from its peer. A
//! coordinator (outside this crate) moves bounded windows of changes
//! between two [`SyncSource`]s:
//!
//! ```text
//! ┌──────────────────────── JournalSource (one per node) ────────────────────────┐
//! │                                                                              │
//! │  ┌────────────────┐   ┌─────────────────────┐   ┌─────────────────────────┐  │
//! │  │ CheckpointStore│   │   ChangeJournal     │   │  ChangeApplier<T>       │  │
//! │  │ last-sync-*    │   │ capture + windows   │   │ ordered, atomic batches │  │
//! │  └───────┬────────┘   └──────────┬──────────┘   └────────────┬────────────┘  │
//! │          │                       │                           │               │
//! │          ▼                       ▼                           ▼               │
//! │  ┌────────────────────────────────────────────────────────────────────────┐  │
//! │  │ SQLite: sync_settings │ sync_journal │ (ChangeTarget tables)           │  │
//! │  └────────────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Windows
//!
//! A window is the half-open interval `(from, to]` of [`Watermark`]s. `from`
//! is the last persisted checkpoint (absent means "from the beginning"),
//! `to` comes from [`SyncSource::move_sync_point`]. Consecutive windows
//! share their boundary, so every record is enumerated by exactly one of
//! them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use journal_sync::{EntityTable, JournalSource, SyncConfig, SyncRecord, SyncSource};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> journal_sync::Result<()> {
//!     let parent = JournalSource::open(&SyncConfig::for_testing("parent"), EntityTable::new()).await?;
//!     let child = JournalSource::open(&SyncConfig::for_testing("child"), EntityTable::new()).await?;
//!
//!     parent
//!         .journal()
//!         .append(&SyncRecord::insert("patient.1", json!({"name": "Ada"}), journal_sync::Watermark::now()))
//!         .await?;
//!
//!     let from = parent.get_last_sync_local().await?;
//!     let to = parent.move_sync_point().await?;
//!     let changed = parent.get_changed(from, to).await?;
//!     child.apply_changed(&changed).await?;
//!     child.set_last_sync_remote(Some(to)).await?;
//!     parent.set_last_sync_local(Some(to)).await?;
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod checkpoint;
pub mod config;
pub mod database;
pub mod error;
pub mod journal;
pub mod metrics;
pub mod record;
pub mod source;
pub mod target;
pub mod watermark;

// Re-exports for convenience
pub use applier::{ApplyOutcome, ChangeApplier};
pub use checkpoint::{CheckpointKey, CheckpointStore};
pub use config::{ApplyConfig, DatabaseConfig, SyncConfig, SyncPointStrategy};
pub use database::Database;
pub use error::{Result, SyncError};
pub use journal::{ChangeJournal, JournalStats};
pub use record::{Change, RecordStatus, SyncRecord};
pub use source::{JournalSource, SyncSource};
pub use target::{ChangeTarget, EntityTable, NoOpTarget};
pub use watermark::{Watermark, WATERMARK_FORMAT};
