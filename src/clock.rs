//! Time sources.
//!
//! Spans report absolute wall-clock start times but measure durations
//! against a monotonic reference, so a [`TimePoint`] carries both. The
//! [`Clock`] is swappable to make timing-sensitive code testable.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// A single observation of the current time.
#[derive(Clone, Copy, Debug)]
pub struct TimePoint {
    /// Absolute time, for reporting.
    pub wall: SystemTime,
    /// Monotonic reference, for duration arithmetic.
    pub tick: Instant,
}

/// Source of [`TimePoint`]s.
pub type Clock = Arc<dyn Fn() -> TimePoint + Send + Sync>;

/// The system clock.
pub fn default_clock() -> Clock {
    Arc::new(|| TimePoint {
        wall: SystemTime::now(),
        tick: Instant::now(),
    })
}
