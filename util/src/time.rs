//! General time utility functions

use std::time::Duration;
use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a chrono duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration.num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Build a std duration from a number of seconds.
///
/// Negative and non-finite values give a zero duration rather than panicking
/// as `Duration::from_secs_f64` would.
pub fn secs_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    }
    else {
        Duration::from_secs(0)
    }
}
