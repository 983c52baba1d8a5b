//! Normalization of caller-supplied window bounds into epoch milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampInput {
    EpochMs(i64),
    Iso8601(String),
    NaiveDateTime(NaiveDateTime),
    DateTime(DateTime<Utc>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("invalid timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),
}

impl From<i64> for TimestampInput {
    fn from(value: i64) -> Self {
        Self::EpochMs(value)
    }
}

impl From<&str> for TimestampInput {
    fn from(value: &str) -> Self {
        Self::Iso8601(value.to_string())
    }
}

impl From<String> for TimestampInput {
    fn from(value: String) -> Self {
        Self::Iso8601(value)
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(value: NaiveDateTime) -> Self {
        Self::NaiveDateTime(value)
    }
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Converts any supported representation into epoch milliseconds (UTC).
///
/// Integers pass through untouched. Naive date-times and ISO-8601 strings
/// without an offset are read as UTC wall-clock; strings carrying an explicit
/// offset are converted to UTC.
pub fn normalize_timestamp(value: impl Into<TimestampInput>) -> Result<i64, TimestampError> {
    match value.into() {
        TimestampInput::EpochMs(ms) => Ok(ms),
        TimestampInput::NaiveDateTime(naive) => {
            Ok(Utc.from_utc_datetime(&naive).timestamp_millis())
        }
        TimestampInput::DateTime(dt) => Ok(dt.timestamp_millis()),
        TimestampInput::Iso8601(raw) => parse_iso8601_ms(&raw),
    }
}

fn parse_iso8601_ms(raw: &str) -> Result<i64, TimestampError> {
    let text = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight).timestamp_millis());
        }
    }

    Err(TimestampError::InvalidTimestamp(raw.to_string()))
}
