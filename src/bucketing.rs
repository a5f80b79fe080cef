//! Time-bucket conversions for detectors and sessions.
//!
//! Buckets are integer ids obtained by flooring a timestamp on the Unix epoch
//! axis to a fixed width. Equal ids mean the same bucket; the id times the
//! width gives back the bucket start. [`bucket_id`] floors the absolute
//! instant, [`local_bucket_id`] floors the wall clock the device recorded.

use crate::model::timestamp::Timestamp;
use chrono::{DateTime, Timelike};

/// Display format for wall-clock timestamps in tables and session ids.
pub const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Seconds since the Unix epoch.
pub fn epoch_secs(ts: &Timestamp) -> i64 {
    ts.timestamp()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis(ts: &Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Bucket id of the instant `ts` for a width in seconds. `width_secs` must be positive.
pub fn bucket_id(ts: &Timestamp, width_secs: i64) -> i64 {
    epoch_secs(ts).div_euclid(width_secs)
}

/// Bucket id of the local wall clock of `ts`, so an 8-hour bucket starts at
/// local midnight whatever the offset.
pub fn local_bucket_id(ts: &Timestamp, width_secs: i64) -> i64 {
    ts.naive_local().and_utc().timestamp().div_euclid(width_secs)
}

/// Start instant (UTC) of the bucket with the given id.
pub fn bucket_start(bucket: i64, width_secs: i64) -> Option<Timestamp> {
    DateTime::from_timestamp(bucket.checked_mul(width_secs)?, 0).map(|dt| dt.fixed_offset())
}

/// Local hour-of-day bucket (0..=23).
pub fn hour_of_day(ts: &Timestamp) -> u32 {
    ts.hour()
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` on its local wall clock. A
/// non-UTC offset is appended (`+10:00`) so the text parses back to the same
/// instant.
pub fn format_wall_clock(ts: &Timestamp) -> String {
    if ts.offset().local_minus_utc() == 0 {
        ts.format(WALL_CLOCK_FORMAT).to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%:z").to_string()
    }
}

/// Serde adapter writing timestamps through [`format_wall_clock`].
pub mod wall_clock {
    use crate::model::timestamp::Timestamp;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_wall_clock(ts))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
