//! Token-bucket rate limiter used by the samplers.

use std::time::{Duration, Instant};

/// A token bucket with continuous refill and an effective-rate estimate.
///
/// Capacity and refill rate are both `max_per_second`, so at most that many
/// acquisitions succeed in any one-second window once the bucket has
/// drained. The effective rate averages the allowed/requested ratio of the
/// current one-second window with the previous window's, smoothing the
/// value reported in `_dd.limit_psr`.
#[derive(Debug)]
pub(crate) struct Limiter {
    per_second: f64,
    available: f64,
    bucket_size: f64,
    last_refill: Instant,
    window_start: Instant,
    window_allowed: u32,
    window_requested: u32,
    previous_window_rate: Option<f64>,
}

impl Limiter {
    pub(crate) fn new(now: Instant, max_per_second: f64) -> Self {
        Limiter {
            per_second: max_per_second,
            available: max_per_second,
            bucket_size: max_per_second,
            last_refill: now,
            window_start: now,
            window_allowed: 0,
            window_requested: 0,
            previous_window_rate: None,
        }
    }

    /// Try to take one token.
    pub(crate) fn allow(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.available = f64::min(
            self.bucket_size,
            self.available + elapsed.as_secs_f64() * self.per_second,
        );

        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            self.previous_window_rate = Some(self.window_rate());
            self.window_start = now;
            self.window_allowed = 0;
            self.window_requested = 0;
        }

        self.window_requested += 1;
        if self.available >= 1.0 {
            self.available -= 1.0;
            self.window_allowed += 1;
            true
        } else {
            false
        }
    }

    /// The allowed/requested ratio, smoothed over the previous second.
    pub(crate) fn effective_rate(&self) -> f64 {
        match self.previous_window_rate {
            Some(previous) => (previous + self.window_rate()) / 2.0,
            None => self.window_rate(),
        }
    }

    fn window_rate(&self) -> f64 {
        if self.window_requested == 0 {
            1.0
        } else {
            f64::from(self.window_allowed) / f64::from(self.window_requested)
        }
    }
}
