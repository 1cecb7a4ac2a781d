//! Mock ChangeTarget for testing.
//!
//! Records every apply() call for assertions. Configurable to fail on a
//! given call number or entity id, to exercise batch rollback.

use journal_sync::target::{BoxFuture, ChangeTarget};
use journal_sync::{SyncError, SyncRecord};
use sqlx::sqlite::SqliteConnection;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A recorded apply() call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyCall {
    pub record_id: String,
    pub entity_id: String,
    pub op: &'static str,
}

/// Mock implementation of ChangeTarget that records all calls.
///
/// Calls are recorded even when the surrounding batch later rolls back, so
/// `calls()` shows attempts, not committed state.
///
/// # Example
/// ```rust,ignore
/// let mock = MockTarget::new().fail_on_call(3);
/// // Use in a JournalSource...
/// assert_eq!(mock.calls().len(), 3);
/// ```
#[derive(Default)]
pub struct MockTarget {
    calls: Mutex<Vec<ApplyCall>>,
    /// Fail the Nth call (1-based); 0 disables
    fail_on_call: AtomicUsize,
    /// Entities that are always refused
    refuse: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the Nth apply() call (1-based).
    pub fn fail_on_call(self, n: usize) -> Self {
        self.fail_on_call.store(n, Ordering::SeqCst);
        self
    }

    /// Stop failing.
    pub fn heal(&self) {
        self.fail_on_call.store(0, Ordering::SeqCst);
        self.refuse.lock().unwrap().clear();
    }

    /// Refuse every change to an entity.
    pub fn refuse_entity(&self, entity_id: &str) {
        self.refuse.lock().unwrap().insert(entity_id.to_string());
    }

    pub fn calls(&self) -> Vec<ApplyCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl ChangeTarget for MockTarget {
    fn apply<'a>(&'a self, _conn: &'a mut SqliteConnection, record: &'a SyncRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(ApplyCall {
                    record_id: record.id.clone(),
                    entity_id: record.entity_id.clone(),
                    op: record.change.kind(),
                });
                calls.len()
            };

            let refused = self.refuse.lock().unwrap().contains(&record.entity_id);
            if refused || self.fail_on_call.load(Ordering::SeqCst) == n {
                return Err(SyncError::EntityConflict {
                    entity_id: record.entity_id.clone(),
                    message: format!("mock failure on call {}", n),
                });
            }
            Ok(())
        })
    }
}
