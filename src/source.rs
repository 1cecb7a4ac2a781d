// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync source contract and its journal-backed implementation.
//!
//! A coordinator drives two [`SyncSource`]s through one window at a time:
//!
//! ```text
//!   sender                                      receiver
//!   ──────                                      ────────
//!   from = get_last_sync_local()
//!   to   = move_sync_point()
//!   get_changed(from, to) ───── records ─────▶ apply_changed(records)
//!   get_deleted(from, to) ───── records ─────▶ apply_deleted(records)
//!   update_status(ids, Applied)                set_last_sync_remote(to)
//!   set_last_sync_local(to)
//! ```
//!
//! Checkpoints move only after the receiver committed. A crash in between
//! re-fetches the same window, which the applier absorbs.
//!
//! The trait uses boxed futures so coordinators can hold `Box<dyn SyncSource>`
//! for sources of different kinds.

use crate::applier::{ApplyOutcome, ChangeApplier};
use crate::checkpoint::CheckpointStore;
use crate::config::{SyncConfig, SyncPointStrategy};
use crate::database::Database;
use crate::error::Result;
use crate::journal::ChangeJournal;
use crate::record::{RecordStatus, SyncRecord};
use crate::target::{BoxFuture, ChangeTarget};
use crate::watermark::Watermark;
use std::sync::Arc;
use tracing::{debug, info};

/// Operations a coordinator needs from one side of a sync.
///
/// `get_deleted` and `apply_deleted` are no-ops for [`JournalSource`] only.
/// Other sources may deliver deletions separately, so callers must always
/// invoke both.
pub trait SyncSource: Send + Sync {
    /// Last point up to which local changes were captured. `None` if never.
    fn get_last_sync_local(&self) -> BoxFuture<'_, Option<Watermark>>;

    fn set_last_sync_local(&self, value: Option<Watermark>) -> BoxFuture<'_, ()>;

    /// Last point up to which remote changes were received. `None` if never.
    fn get_last_sync_remote(&self) -> BoxFuture<'_, Option<Watermark>>;

    fn set_last_sync_remote(&self, value: Option<Watermark>) -> BoxFuture<'_, ()>;

    /// Allocate the upper bound for the next capture window.
    fn move_sync_point(&self) -> BoxFuture<'_, Watermark>;

    /// Pending changes with `from < position <= to`, ordered by position.
    fn get_changed(&self, from: Option<Watermark>, to: Watermark) -> BoxFuture<'_, Vec<SyncRecord>>;

    /// Deletions delivered separately from `get_changed`.
    fn get_deleted(&self, from: Option<Watermark>, to: Watermark) -> BoxFuture<'_, Vec<SyncRecord>>;

    /// Apply an ordered batch atomically and idempotently.
    fn apply_changed<'a>(&'a self, records: &'a [SyncRecord]) -> BoxFuture<'a, ApplyOutcome>;

    fn apply_deleted<'a>(&'a self, records: &'a [SyncRecord]) -> BoxFuture<'a, ()>;

    /// Report delivery status for previously enumerated records.
    ///
    /// Returns how many records actually changed status.
    fn update_status<'a>(&'a self, record_ids: &'a [String], status: RecordStatus) -> BoxFuture<'a, usize>;
}

/// Journal-backed sync source.
///
/// Composes its three parts explicitly; it holds no state of its own beyond
/// them.
pub struct JournalSource<T: ChangeTarget> {
    node_id: String,
    database: Database,
    checkpoints: CheckpointStore,
    journal: ChangeJournal,
    applier: ChangeApplier<T>,
    sync_point: SyncPointStrategy,
}

impl<T: ChangeTarget> JournalSource<T> {
    /// Assemble a source from already constructed parts.
    pub fn new(
        node_id: impl Into<String>,
        database: Database,
        checkpoints: CheckpointStore,
        journal: ChangeJournal,
        applier: ChangeApplier<T>,
        sync_point: SyncPointStrategy,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            database,
            checkpoints,
            journal,
            applier,
            sync_point,
        }
    }

    /// Open the node database and wire everything up from config.
    pub async fn open(config: &SyncConfig, target: T) -> Result<Self> {
        config.validate()?;

        let database = Database::open(&config.database).await?;
        let checkpoints = CheckpointStore::new(&database);
        let journal = ChangeJournal::new(&database);
        let applier =
            ChangeApplier::new(&database, Arc::new(target), config.apply.clone(), &config.node_id).await?;

        info!(
            node_id = %config.node_id,
            path = %database.path(),
            sync_point = ?config.sync_point,
            "Journal source opened"
        );

        Ok(Self::new(
            &config.node_id,
            database,
            checkpoints,
            journal,
            applier,
            config.sync_point,
        ))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// The journal, for capturing local changes.
    pub fn journal(&self) -> &ChangeJournal {
        &self.journal
    }

    pub fn applier(&self) -> &ChangeApplier<T> {
        &self.applier
    }

    async fn next_sync_point(&self) -> Result<Watermark> {
        let point = match self.sync_point {
            SyncPointStrategy::WallClock => Watermark::now(),
            SyncPointStrategy::JournalHead => self.journal.head().await?.unwrap_or_else(Watermark::now),
        };
        debug!(node_id = %self.node_id, sync_point = %point, "Sync point moved");
        Ok(point)
    }
}

impl<T: ChangeTarget> SyncSource for JournalSource<T> {
    fn get_last_sync_local(&self) -> BoxFuture<'_, Option<Watermark>> {
        Box::pin(self.checkpoints.get_local())
    }

    fn set_last_sync_local(&self, value: Option<Watermark>) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.checkpoints.set_local(value.as_ref()).await })
    }

    fn get_last_sync_remote(&self) -> BoxFuture<'_, Option<Watermark>> {
        Box::pin(self.checkpoints.get_remote())
    }

    fn set_last_sync_remote(&self, value: Option<Watermark>) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.checkpoints.set_remote(value.as_ref()).await })
    }

    fn move_sync_point(&self) -> BoxFuture<'_, Watermark> {
        Box::pin(self.next_sync_point())
    }

    fn get_changed(&self, from: Option<Watermark>, to: Watermark) -> BoxFuture<'_, Vec<SyncRecord>> {
        Box::pin(async move { self.journal.changed_since(from.as_ref(), &to).await })
    }

    fn get_deleted(&self, from: Option<Watermark>, to: Watermark) -> BoxFuture<'_, Vec<SyncRecord>> {
        Box::pin(async move { self.journal.deleted_since(from.as_ref(), &to).await })
    }

    fn apply_changed<'a>(&'a self, records: &'a [SyncRecord]) -> BoxFuture<'a, ApplyOutcome> {
        Box::pin(self.applier.apply_changed(records))
    }

    fn apply_deleted<'a>(&'a self, records: &'a [SyncRecord]) -> BoxFuture<'a, ()> {
        Box::pin(self.applier.apply_deleted(records))
    }

    fn update_status<'a>(&'a self, record_ids: &'a [String], status: RecordStatus) -> BoxFuture<'a, usize> {
        Box::pin(self.journal.transition(record_ids, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplyConfig;
    use crate::error::SyncError;
    use crate::target::{EntityTable, NoOpTarget};
    use serde_json::json;

    fn wm(s: &str) -> Watermark {
        Watermark::parse(s).unwrap()
    }

    async fn source(node_id: &str) -> JournalSource<EntityTable> {
        JournalSource::open(&SyncConfig::for_testing(node_id), EntityTable::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut config = SyncConfig::for_testing("n");
        config.node_id = String::new();
        let result = JournalSource::open(&config, NoOpTarget).await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_from_injected_parts() {
        let db = Database::in_memory().await.unwrap();
        let applier = ChangeApplier::new(&db, Arc::new(NoOpTarget), ApplyConfig::default(), "relay")
            .await
            .unwrap();
        let source = JournalSource::new(
            "relay",
            db.clone(),
            CheckpointStore::new(&db),
            ChangeJournal::new(&db),
            applier,
            SyncPointStrategy::WallClock,
        );

        assert_eq!(source.node_id(), "relay");
        assert!(source.get_last_sync_local().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoints_through_trait() {
        let source = source("child").await;
        let dyn_source: &dyn SyncSource = &source;

        assert!(dyn_source.get_last_sync_remote().await.unwrap().is_none());

        let t = wm("2024-03-01 10:10:00.000");
        dyn_source.set_last_sync_remote(Some(t)).await.unwrap();
        assert_eq!(dyn_source.get_last_sync_remote().await.unwrap(), Some(t));
        assert!(dyn_source.get_last_sync_local().await.unwrap().is_none());

        dyn_source.set_last_sync_remote(None).await.unwrap();
        assert!(dyn_source.get_last_sync_remote().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wall_clock_sync_point_is_now() {
        let source = source("parent").await;
        let before = Watermark::now();
        let point = source.move_sync_point().await.unwrap();
        let after = Watermark::now();

        assert!(before <= point && point <= after);
        assert!(source.move_sync_point().await.unwrap() >= point);
    }

    #[tokio::test]
    async fn test_journal_head_sync_point() {
        let mut config = SyncConfig::for_testing("parent");
        config.sync_point = SyncPointStrategy::JournalHead;
        let source = JournalSource::open(&config, NoOpTarget).await.unwrap();

        // Empty journal falls back to now
        let before = Watermark::now();
        assert!(source.move_sync_point().await.unwrap() >= before);

        let head = wm("2024-03-01 10:05:00.000");
        source
            .journal()
            .append(&SyncRecord::insert("p.1", json!({}), wm("2024-03-01 10:00:00.000")))
            .await
            .unwrap();
        source
            .journal()
            .append(&SyncRecord::insert("p.2", json!({}), head))
            .await
            .unwrap();

        assert_eq!(source.move_sync_point().await.unwrap(), head);
    }

    #[tokio::test]
    async fn test_window_between_two_sources() {
        let parent = source("parent").await;
        let child = source("child").await;

        let records = vec![
            SyncRecord::insert("p.1", json!({"v": 1}), wm("2024-03-01 10:00:00.000")),
            SyncRecord::update("p.1", json!({"v": 2}), wm("2024-03-01 10:05:00.000")),
        ];
        for r in &records {
            parent.journal().append(r).await.unwrap();
        }

        let from = parent.get_last_sync_local().await.unwrap();
        let to = wm("2024-03-01 10:10:00.000");
        let changed = parent.get_changed(from, to).await.unwrap();
        let deleted = parent.get_deleted(from, to).await.unwrap();
        assert_eq!(changed, records);
        assert!(deleted.is_empty());

        let outcome = child.apply_changed(&changed).await.unwrap();
        child.apply_deleted(&deleted).await.unwrap();
        assert_eq!(outcome.applied, 2);

        let ids: Vec<String> = changed.iter().map(|r| r.id.clone()).collect();
        assert_eq!(parent.update_status(&ids, RecordStatus::Sent).await.unwrap(), 2);
        assert_eq!(parent.update_status(&ids, RecordStatus::Applied).await.unwrap(), 2);
        child.set_last_sync_remote(Some(to)).await.unwrap();
        parent.set_last_sync_local(Some(to)).await.unwrap();

        let table = child.applier().target();
        assert_eq!(
            table.get(child.database().pool(), "p.1").await.unwrap(),
            Some(json!({"v": 2}))
        );

        // Next window starts strictly after `to`
        let next = parent
            .get_changed(Some(to), wm("2024-03-01 10:20:00.000"))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_boxed_sources_are_interchangeable() {
        let mut sources: Vec<Box<dyn SyncSource>> = Vec::new();
        sources.push(Box::new(source("a").await));
        sources.push(Box::new(
            JournalSource::open(&SyncConfig::for_testing("b"), NoOpTarget).await.unwrap(),
        ));

        for s in &sources {
            let to = s.move_sync_point().await.unwrap();
            assert!(s.get_changed(None, to).await.unwrap().is_empty());
            assert!(s.get_deleted(None, to).await.unwrap().is_empty());
            s.apply_deleted(&[]).await.unwrap();
        }
    }
}
