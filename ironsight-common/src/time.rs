//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Convert microseconds to duration
pub fn micros_to_duration(micros: u64) -> std::time::Duration {
    std::time::Duration::from_micros(micros)
}

/// Whole microseconds in a duration, saturating at `u64::MAX`
pub fn duration_to_micros(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
