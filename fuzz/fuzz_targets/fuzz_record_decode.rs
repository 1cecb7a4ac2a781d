//! Fuzz target for transfer record decoding.
//!
//! Records arrive from the peer as JSON; decoding must never panic.

#![no_main]

use journal_sync::SyncRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = serde_json::from_slice::<SyncRecord>(data) {
        let _ = record.change.kind();
        let _ = record.status.is_pending();
        let _ = serde_json::to_string(&record);
    }
});
