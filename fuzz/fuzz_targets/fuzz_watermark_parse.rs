//! Fuzz target for watermark parsing.
//!
//! This tests that `Watermark::parse` never panics on arbitrary input,
//! and that anything it accepts formats back to text it accepts again.

#![no_main]

use journal_sync::Watermark;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(watermark) = Watermark::parse(data) {
        let canonical = watermark.format();
        let reparsed = Watermark::parse(&canonical).expect("canonical text must parse");
        assert_eq!(reparsed, watermark);
    }
});
