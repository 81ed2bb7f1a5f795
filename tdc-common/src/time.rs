//! Timestamp utilities for survey timing

use chrono::{DateTime, Local, Utc};

/// Wall-clock format used in persisted rows
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in server-local time as `YYYY-MM-DD HH:MM:SS`
pub fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Elapsed minutes between two instants, rounded to two decimals
///
/// Whole seconds are taken first, so sub-second noise never shows up in the
/// reported figure. Negative spans clamp to zero.
pub fn elapsed_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let seconds = (end - start).num_seconds().max(0);
    (seconds as f64 / 60.0 * 100.0).round() / 100.0
}
