//! ISO-8601 parsing and formatting in UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{Result, StewardError};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 timestamp into UTC.
///
/// Accepts a `Z` suffix, numeric offsets (with or without a colon), naive
/// date-times (taken as UTC) and bare dates (midnight UTC).
pub fn parse_iso_utc(value: &str) -> Option<DateTime<Utc>> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Like [`parse_iso_utc`] but reports the offending input.
pub fn require_iso_utc(value: &str) -> Result<DateTime<Utc>> {
    parse_iso_utc(value).ok_or_else(|| StewardError::InvalidTimestamp(value.to_string()))
}

/// Format as RFC 3339 with a `Z` suffix.
pub fn iso_utc(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Whole days elapsed from `earlier` to `later`, floored and never negative.
pub fn whole_days_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> i64 {
    let secs = (later - earlier).num_seconds();
    if secs <= 0 {
        0
    } else {
        secs / 86_400
    }
}
