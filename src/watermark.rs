// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Watermarks: positions in a node's change log.
//!
//! A [`Watermark`] is a UTC instant with millisecond precision. It bounds a
//! capture window `(from, to]` and is what the checkpoint store persists.
//!
//! # Absence
//!
//! "No watermark yet" is `Option::<Watermark>::None`. Because `Option`
//! orders `None` below every `Some`, an absent lower bound behaves as minus
//! infinity in range comparisons without any special casing.
//!
//! # Canonical Format
//!
//! ```text
//! 2024-03-01 10:05:00.250
//! └──────── %Y-%m-%d %H:%M:%S%.3f (UTC)
//! ```
//!
//! The same pattern is used for reading and writing, so
//! `Watermark::parse(&w.to_string()) == Ok(w)` for every watermark.
//! Parsing is strict: only text that renders back byte for byte is accepted,
//! which rules out leading signs, padding and missing milliseconds.
//!
//! # Range
//!
//! The rendered form is fixed width (23 characters) for years 0000 to 9999.
//! [`Watermark::from_millis`] refuses anything outside that range. Instants
//! built through [`Watermark::from_datetime`] are not checked, and one
//! outside the range renders wider and will not parse back.

use crate::error::{Result, SyncError};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Canonical text pattern for persisted and transmitted watermarks.
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Length of a canonically rendered watermark.
const CANONICAL_LEN: usize = 23;

/// `0000-01-01 00:00:00.000` in epoch milliseconds.
const MIN_MILLIS: i64 = -62_167_219_200_000;

/// `9999-12-31 23:59:59.999` in epoch milliseconds.
const MAX_MILLIS: i64 = 253_402_300_799_999;

/// A totally ordered, immutable position marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// The current instant, truncated to millisecond precision.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap a UTC instant. Sub-millisecond precision is dropped so that the
    /// value survives a format/parse round trip unchanged.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(3))
    }

    /// Build a watermark from milliseconds since the Unix epoch.
    ///
    /// Returns `None` outside years 0000 to 9999, where the canonical form
    /// would lose its fixed width.
    pub fn from_millis(millis: i64) -> Option<Self> {
        if !(MIN_MILLIS..=MAX_MILLIS).contains(&millis) {
            return None;
        }
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch (the journal's storage encoding).
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying instant.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Parse a canonically formatted watermark.
    ///
    /// # Errors
    ///
    /// [`SyncError::Format`] carrying the raw value, and the parse cause when
    /// chrono rejected it. Text chrono accepts but that does not match the
    /// rendered form exactly is rejected too.
    pub fn parse(value: &str) -> Result<Self> {
        let watermark = NaiveDateTime::parse_from_str(value, WATERMARK_FORMAT)
            .map(|naive| Self::from_datetime(Utc.from_utc_datetime(&naive)))
            .map_err(|e| SyncError::format(value, e))?;

        if value.len() != CANONICAL_LEN || watermark.format() != value {
            return Err(SyncError::non_canonical(value));
        }
        Ok(watermark)
    }

    /// Render in the canonical format.
    pub fn format(&self) -> String {
        self.to_string()
    }

    /// True if this position falls in the window `(from, to]`.
    pub fn within_window(&self, from: Option<&Watermark>, to: &Watermark) -> bool {
        from.map_or(true, |from| self > from) && self <= to
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WATERMARK_FORMAT))
    }
}

impl FromStr for Watermark {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(at: DateTime<Utc>) -> Self {
        Self::from_datetime(at)
    }
}

impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Watermark::parse(&raw).map_err(serde::de::Error::custom)
    }
}
