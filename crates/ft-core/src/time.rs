//! Time utilities for fanterm
//!
//! Every timestamp that crosses the client boundary (poll cursors, activity
//! stamps, execution records) is a Unix timestamp in milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
///
/// # Examples
/// ```
/// use ft_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calculate elapsed time in milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Calculate elapsed time as a Duration since a given millisecond timestamp.
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(elapsed_millis(since_millis))
}

/// Next timestamp of a strictly increasing sequence.
///
/// Uses the wall clock when it has moved past `last`, otherwise `last + 1`,
/// so that two events in the same millisecond still order (and compare)
/// distinctly.
pub fn next_monotonic_millis(last: u64) -> u64 {
    current_time_millis().max(last.saturating_add(1))
}
