//! Per-container log rate limiting.
//!
//! The host journal applies a single rate limit to the whole daemon, so one
//! noisy container can push quieter containers' output over the limit. This
//! limiter runs before messages reach the journal, with one instance per
//! container.

use std::time::{Duration, Instant};

/// Fixed-interval token bucket keyed by wall-clock time.
#[derive(Debug)]
pub struct RateLimit {
    /// Number of messages to allow in each interval.
    burst: usize,
    /// Length of an interval.
    interval: Duration,
    /// Beginning of the current interval; unset until the first check.
    begin: Option<Instant>,
    /// Messages admitted in the current interval.
    num: usize,
    /// Messages suppressed in the current interval.
    suppressed: usize,
}

impl RateLimit {
    /// Create a limiter admitting `burst` messages per `interval`.
    #[must_use]
    pub const fn new(burst: usize, interval: Duration) -> Self {
        Self {
            burst,
            interval,
            begin: None,
            num: 0,
            suppressed: 0,
        }
    }

    /// Decide whether a message should be admitted now.
    ///
    /// Returns the admission decision and the number of messages that were
    /// suppressed in the interval that just closed. The suppressed count is
    /// reported exactly once, on the first admitted message of the interval
    /// following the suppression, and is zero on every other call.
    pub fn check(&mut self) -> (bool, usize) {
        self.check_at(Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub(crate) fn check_at(&mut self, now: Instant) -> (bool, usize) {
        // First message ever: open the interval.
        let Some(begin) = self.begin else {
            self.suppressed = 0;
            self.num = 1;
            self.begin = Some(now);
            return (true, 0);
        };

        // Past the end of the tracked interval: open a new one with this
        // message as its first admission, and report what the old interval
        // suppressed.
        if now >= begin + self.interval {
            let previous_suppressed = self.suppressed;
            self.suppressed = 0;
            self.num = 1;
            self.begin = Some(now);
            return (true, previous_suppressed);
        }

        // Within the interval and under the burst limit.
        if self.num < self.burst {
            self.num += 1;
            return (true, 0);
        }

        // Too many within the interval.
        self.suppressed += 1;
        (false, 0)
    }

    /// Number of messages suppressed in the current interval.
    #[must_use]
    pub const fn suppressed(&self) -> usize {
        self.suppressed
    }
}
