//! Status report timestamps.
//!
//! Reports carry either an epoch-millisecond integer or an ISO-8601 string.
//! Strings without an offset are read as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A timestamp exactly as received on a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
    /// ISO-8601 date-time (or bare date).
    Iso(String),
}

impl RawTimestamp {
    /// Parses into a UTC instant, failing with `InvalidTimestamp`.
    pub fn parse(&self) -> Result<DateTime<Utc>, LedgerError> {
        match self {
            Self::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| LedgerError::invalid_timestamp(ms)),
            Self::Iso(text) => parse_iso(text).ok_or_else(|| LedgerError::invalid_timestamp(text)),
        }
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Iso(format_timestamp(value))
    }
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EpochMillis(ms) => write!(f, "{ms}"),
            Self::Iso(text) => write!(f, "{text}"),
        }
    }
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical storage format: RFC 3339 with milliseconds and a `Z` suffix.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
