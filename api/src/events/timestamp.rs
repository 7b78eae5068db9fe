//! Timestamp normalization for source payloads.
//!
//! Source timestamps arrive as ISO-8601 strings, sometimes with a trailing
//! `Z`, sometimes with an explicit offset, occasionally without any zone at
//! all. Everything is normalized to a timezone-aware UTC value; a missing or
//! unparseable value becomes the ingestion time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

/// Normalize an optional raw timestamp, falling back to `now`.
pub fn normalize_timestamp(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    match raw {
        Some(value) => parse_timestamp(value).unwrap_or_else(|| {
            debug!(raw = %value, "timestamp_unparseable_using_now");
            now
        }),
        None => now,
    }
}

/// Parse an ISO-8601 timestamp.
///
/// A trailing `Z` is rewritten to `+00:00` first. Seconds may be omitted,
/// and a bare date means midnight. Values without an offset are taken to be
/// UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let normalized = match raw.strip_suffix('Z') {
        Some(rest) => format!("{}+00:00", rest),
        None => raw.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(parsed) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z") {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
