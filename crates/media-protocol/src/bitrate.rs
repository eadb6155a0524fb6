//! Throughput accounting for one direction of a data channel.
//!
//! A [`BitrateMeter`] is owned by exactly one loop (the send loop or the
//! receive loop), so it needs no locking. Time is passed in by the caller,
//! which keeps the meter deterministic under test.

use std::time::{Duration, Instant};

/// Default reporting window.
pub const DEFAULT_REPORT_WINDOW: Duration = Duration::from_secs(1);

/// One bitrate report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateSample {
    /// Bytes counted during the window
    pub bytes: u64,
    /// Wall-clock length of the window
    pub elapsed: Duration,
}

impl BitrateSample {
    /// Rate in bits per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // byte counts stay far below 2^53
    pub fn bits_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes as f64 * 8.0) / secs
    }

    /// Rate in megabits per second, the unit operators see.
    #[must_use]
    pub fn megabits_per_second(&self) -> f64 {
        self.bits_per_second() / 1_000_000.0
    }
}

/// Running byte counter with a once-per-window report.
#[derive(Debug, Clone)]
pub struct BitrateMeter {
    accumulated: u64,
    window_start: Instant,
    window: Duration,
}

impl BitrateMeter {
    /// Start a meter whose first window opens at `now`.
    #[must_use]
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            accumulated: 0,
            window_start: now,
            window,
        }
    }

    /// Count bytes that went over the wire.
    pub fn record(&mut self, bytes: usize) {
        self.accumulated = self.accumulated.saturating_add(bytes as u64);
    }

    /// Bytes counted since the last report.
    #[must_use]
    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Report and reset if at least one window has elapsed since the last
    /// report.
    ///
    /// The report and the reset happen in the same call, so no bytes are
    /// counted twice or dropped across the boundary.
    pub fn sample_if_due(&mut self, now: Instant) -> Option<BitrateSample> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        Some(self.take(now, elapsed))
    }

    /// Report and reset unconditionally.
    pub fn sample(&mut self, now: Instant) -> BitrateSample {
        let elapsed = now.saturating_duration_since(self.window_start);
        self.take(now, elapsed)
    }

    fn take(&mut self, now: Instant, elapsed: Duration) -> BitrateSample {
        let sample = BitrateSample {
            bytes: self.accumulated,
            elapsed,
        };
        self.accumulated = 0;
        self.window_start = now;
        sample
    }
}
