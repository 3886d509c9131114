//! Time and duration conversion utilities.
//!
//! Timings are carried as `f64` seconds (the remote alignment format); these
//! helpers convert to and from [`Duration`] without panicking.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Extension trait for `f64` seconds.
pub trait SecondsExt {
    /// Convert seconds to a [`Duration`].
    ///
    /// Negative and NaN values become zero; values too large for a `Duration`
    /// saturate at `Duration::MAX`.
    fn to_duration(self) -> Duration;
}

impl SecondsExt for f64 {
    fn to_duration(self) -> Duration {
        if self.is_nan() || self <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self).unwrap_or(Duration::MAX)
    }
}
