//! Timestamp parsing for device exports.
//!
//! Devices write either ISO-8601 or day-first local timestamps. Every value
//! parses to an absolute instant that keeps the offset it was recorded with:
//! gaps, windows and ordering use the instant, while hour-of-day rules read
//! the local wall clock. Values without an offset are taken as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

/// A parsed device timestamp.
pub type Timestamp = DateTime<FixedOffset>;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Attach the UTC offset to a wall-clock value that carried none.
pub fn from_naive(ts: NaiveDateTime) -> Timestamp {
    Utc.fix().from_utc_datetime(&ts)
}

/// Parse a raw timestamp cell. Returns `None` when no accepted format matches.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(dt);
    }

    let trimmed_zulu = raw.strip_suffix('Z').unwrap_or(raw);
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed_zulu, fmt) {
            return Some(from_naive(ts));
        }
    }

    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(from_naive)
    })
}
