//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Node setup (in-memory and file-backed)
//! - A reference coordinator that runs one sync window
//! - Mock ChangeTarget for recording and failing applies

pub mod mock_target;

#[allow(unused_imports)]
pub use mock_target::*;

use journal_sync::{
    EntityTable, JournalSource, RecordStatus, Result, SyncConfig, SyncRecord, SyncSource, Watermark,
};
use std::path::Path;

pub fn wm(s: &str) -> Watermark {
    Watermark::parse(s).expect("test watermark")
}

/// In-memory node replaying into an entity table.
pub async fn node(node_id: &str) -> JournalSource<EntityTable> {
    JournalSource::open(&SyncConfig::for_testing(node_id), EntityTable::new())
        .await
        .expect("open node")
}

/// File-backed node, for restart scenarios.
#[allow(dead_code)]
pub async fn file_node(node_id: &str, path: &Path) -> JournalSource<EntityTable> {
    let mut config = SyncConfig::for_testing(node_id);
    config.database = journal_sync::DatabaseConfig::at(path.to_string_lossy());
    JournalSource::open(&config, EntityTable::new())
        .await
        .expect("open file node")
}

/// What one window moved.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct WindowReport {
    pub from: Option<Watermark>,
    pub to: Watermark,
    pub record_ids: Vec<String>,
    pub applied: usize,
    pub skipped: usize,
}

/// Move one window from `sender` to `receiver`, the way a coordinator does.
///
/// Checkpoints move only after the receiver committed. On failure the sent
/// records are marked `FAILED` and both checkpoints stay put.
#[allow(dead_code)]
pub async fn run_window(sender: &dyn SyncSource, receiver: &dyn SyncSource) -> Result<WindowReport> {
    run_window_to(sender, receiver, None).await
}

/// Like [`run_window`], with an explicit upper bound instead of `move_sync_point`.
#[allow(dead_code)]
pub async fn run_window_to(
    sender: &dyn SyncSource,
    receiver: &dyn SyncSource,
    to: Option<Watermark>,
) -> Result<WindowReport> {
    let from = sender.get_last_sync_local().await?;
    let to = match to {
        Some(to) => to,
        None => sender.move_sync_point().await?,
    };

    let changed = sender.get_changed(from, to).await?;
    let deleted = sender.get_deleted(from, to).await?;
    let record_ids: Vec<String> = changed.iter().map(|r| r.id.clone()).collect();

    sender.update_status(&record_ids, RecordStatus::Sent).await?;

    let outcome = match receiver.apply_changed(&changed).await {
        Ok(outcome) => outcome,
        Err(e) => {
            sender.update_status(&record_ids, RecordStatus::Failed).await?;
            return Err(e);
        }
    };
    receiver.apply_deleted(&deleted).await?;

    sender.update_status(&record_ids, RecordStatus::Applied).await?;
    receiver.set_last_sync_remote(Some(to)).await?;
    sender.set_last_sync_local(Some(to)).await?;

    Ok(WindowReport {
        from,
        to,
        record_ids,
        applied: outcome.applied,
        skipped: outcome.skipped,
    })
}

/// Capture a batch of local changes on a node.
#[allow(dead_code)]
pub async fn capture<T: journal_sync::ChangeTarget>(node: &JournalSource<T>, records: &[SyncRecord]) {
    for record in records {
        node.journal().append(record).await.expect("append");
    }
}
