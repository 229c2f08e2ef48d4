//! Moving-average throughput and ETA estimation.
//!
//! The tracker keeps the last `window` samples of `(instant, processed)` for
//! the current phase. The rate is the slope between the oldest and newest
//! sample, so one sample is not enough to report anything: the ETA stays
//! `None` until a second sample with a later timestamp arrives.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default number of samples kept in the window.
pub const DEFAULT_WINDOW: usize = 20;

/// Sliding-window items-per-second estimator.
#[derive(Debug, Clone)]
pub struct ThroughputTracker {
    window: usize,
    samples: VecDeque<(Instant, usize)>,
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ThroughputTracker {
    /// Create a tracker keeping at most `window` samples (minimum 2).
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Record the processed counter now.
    pub fn record(&mut self, processed: usize) {
        self.record_at(Instant::now(), processed);
    }

    /// Record the processed counter at a given instant.
    pub fn record_at(&mut self, at: Instant, processed: usize) {
        self.samples.push_back((at, processed));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    /// Forget all samples (phase change or resume after a pause).
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Items per second across the window.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        let (first_at, first) = *self.samples.front()?;
        let (last_at, last) = *self.samples.back()?;
        let elapsed = last_at.checked_duration_since(first_at)?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(last.saturating_sub(first) as f64 / elapsed)
    }

    /// Estimated time to process `remaining` more items.
    #[must_use]
    pub fn eta(&self, remaining: usize) -> Option<Duration> {
        let rate = self.rate()?;
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}
