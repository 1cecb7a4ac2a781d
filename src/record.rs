// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change records and their status machine.
//!
//! A [`SyncRecord`] is one captured change. It is what the journal
//! enumerates, what travels between nodes, and what the applier replays.
//!
//! # Status Transitions
//!
//! ```text
//!            enumerate          confirm
//!   NEW ─────────────→ SENT ─────────────→ APPLIED (terminal)
//!                      │  ↑
//!              fail    │  │ retry
//!                      ↓  │
//!                     FAILED
//! ```
//!
//! Only `NEW` and `FAILED` records are pending (eligible for a window).
//! Records received from the parent are written locally as `APPLIED`.

use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a captured change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Captured, never handed to a coordinator.
    New,
    /// Handed to a coordinator, outcome unknown.
    Sent,
    /// The counterpart failed to apply it; eligible for retry.
    Failed,
    /// Applied by the counterpart (or applied locally from the parent).
    Applied,
}

impl RecordStatus {
    /// Storage encoding used in the journal's `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "NEW",
            RecordStatus::Sent => "SENT",
            RecordStatus::Failed => "FAILED",
            RecordStatus::Applied => "APPLIED",
        }
    }

    /// Decode the storage encoding.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(RecordStatus::New),
            "SENT" => Some(RecordStatus::Sent),
            "FAILED" => Some(RecordStatus::Failed),
            "APPLIED" => Some(RecordStatus::Applied),
            _ => None,
        }
    }

    /// Whether a record in this status belongs in the next capture window.
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordStatus::New | RecordStatus::Failed)
    }

    /// `APPLIED` never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Applied)
    }

    /// Check the status machine. Re-asserting the current status is allowed
    /// so that coordinator acknowledgements can be retried.
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (New, Sent) | (Sent, Failed) | (Sent, Applied) | (Failed, Sent)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The change a record carries.
///
/// Deletion of a modeled entity is an inline `Delete` record, which is why
/// a journal never needs a separate deleted-records enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "lowercase")]
pub enum Change {
    Insert(serde_json::Value),
    Update(serde_json::Value),
    Delete,
}

impl Change {
    /// Short operation name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Insert(_) => "insert",
            Change::Update(_) => "update",
            Change::Delete => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete)
    }

    /// Entity content after the change, if any.
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Change::Insert(data) | Change::Update(data) => Some(data),
            Change::Delete => None,
        }
    }
}

/// One captured change.
///
/// Once enumerated, only `status` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Globally unique record id; the applier's idempotence key.
    pub id: String,
    /// Capture position, compared against window bounds.
    pub position: Watermark,
    /// Identifier of the modeled entity this change touches.
    pub entity_id: String,
    /// The change itself.
    pub change: Change,
    /// Lifecycle status.
    pub status: RecordStatus,
}

impl SyncRecord {
    /// Create a `NEW` record with a fresh random id.
    pub fn new(entity_id: impl Into<String>, change: Change, position: Watermark) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            position,
            entity_id: entity_id.into(),
            change,
            status: RecordStatus::New,
        }
    }

    pub fn insert(entity_id: impl Into<String>, data: serde_json::Value, position: Watermark) -> Self {
        Self::new(entity_id, Change::Insert(data), position)
    }

    pub fn update(entity_id: impl Into<String>, data: serde_json::Value, position: Watermark) -> Self {
        Self::new(entity_id, Change::Update(data), position)
    }

    pub fn delete(entity_id: impl Into<String>, position: Watermark) -> Self {
        Self::new(entity_id, Change::Delete, position)
    }

    /// Replace the generated id (capture mechanisms with their own ids).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> Watermark {
        Watermark::parse(s).unwrap()
    }

    #[test]
    fn test_status_encoding_roundtrip() {
        for status in [
            RecordStatus::New,
            RecordStatus::Sent,
            RecordStatus::Failed,
            RecordStatus::Applied,
        ] {
            assert_eq!(RecordStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::parse("new"), None);
        assert_eq!(RecordStatus::parse("PENDING"), None);
    }

    #[test]
    fn test_pending_statuses() {
        assert!(RecordStatus::New.is_pending());
        assert!(RecordStatus::Failed.is_pending());
        assert!(!RecordStatus::Sent.is_pending());
        assert!(!RecordStatus::Applied.is_pending());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(RecordStatus::New.can_transition_to(RecordStatus::Sent));
        assert!(RecordStatus::Sent.can_transition_to(RecordStatus::Applied));
    }

    #[test]
    fn test_retry_path_transitions() {
        assert!(RecordStatus::Sent.can_transition_to(RecordStatus::Failed));
        assert!(RecordStatus::Failed.can_transition_to(RecordStatus::Sent));
    }

    #[test]
    fn test_applied_is_terminal() {
        assert!(RecordStatus::Applied.is_terminal());
        assert!(!RecordStatus::Applied.can_transition_to(RecordStatus::New));
        assert!(!RecordStatus::Applied.can_transition_to(RecordStatus::Sent));
        assert!(!RecordStatus::Applied.can_transition_to(RecordStatus::Failed));
        assert!(RecordStatus::Applied.can_transition_to(RecordStatus::Applied));
    }

    #[test]
    fn test_forbidden_shortcuts() {
        // Only FAILED may re-enter SENT, and nothing skips SENT
        assert!(!RecordStatus::New.can_transition_to(RecordStatus::Applied));
        assert!(!RecordStatus::New.can_transition_to(RecordStatus::Failed));
        assert!(!RecordStatus::Failed.can_transition_to(RecordStatus::Applied));
        assert!(!RecordStatus::Sent.can_transition_to(RecordStatus::New));
    }

    #[test]
    fn test_new_record_defaults() {
        let rec = SyncRecord::insert("patient.1", json!({"name": "Ada"}), at("2024-03-01 10:00:00.000"));
        assert_eq!(rec.status, RecordStatus::New);
        assert_eq!(rec.entity_id, "patient.1");
        assert_eq!(rec.change.kind(), "insert");
        assert!(Uuid::parse_str(&rec.id).is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SyncRecord::delete("x", at("2024-03-01 10:00:00.000"));
        let b = SyncRecord::delete("x", at("2024-03-01 10:00:00.000"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_change_data() {
        assert_eq!(Change::Update(json!(1)).data(), Some(&json!(1)));
        assert!(Change::Delete.data().is_none());
        assert!(Change::Delete.is_delete());
    }

    #[test]
    fn test_transfer_object_json_shape() {
        let rec = SyncRecord::update("obs.7", json!({"value": 42}), at("2024-03-01 10:05:00.000"))
            .with_id("rec-1")
            .with_status(RecordStatus::Failed);

        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "rec-1",
                "position": "2024-03-01 10:05:00.000",
                "entity_id": "obs.7",
                "change": {"op": "update", "data": {"value": 42}},
                "status": "failed"
            })
        );

        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_delete_json_has_no_data() {
        let value = serde_json::to_value(Change::Delete).unwrap();
        assert_eq!(value, json!({"op": "delete"}));
    }
}
