//! Per-iteration performance tracking
//!
//! The run loop feeds every pass into a [`PerformanceTracker`]: how long the
//! iteration body took and how long the throttle then slept. A measurement
//! window runs from one `reset()` to the next; each reset yields a
//! [`PerformanceReport`] and records the window's percent use. Only the most
//! recent [`MAX_PERCENT_USE_HISTORY`] windows feed the percent-use metrics.

use std::time::{Duration, Instant};

use crate::constants::MAX_PERCENT_USE_HISTORY;

/// Summary of one measurement window
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    /// When the window began
    pub start_timepoint: Instant,
    /// Total throttle sleep inside the window
    pub idle_iteration_time: Duration,
    /// `100 * (1 - idle / elapsed)`
    pub percent_use: f64,
    /// Longest iteration durations, shortest first
    pub longest_iterations: Vec<Duration>,
}

/// Statistics over every window's percent use
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentUseMetrics {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    /// Sample standard deviation (0 with fewer than two windows)
    pub stdev: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    window_start: Instant,
    idle: Duration,
    longest: Vec<Duration>,
    num_longest: usize,
    percent_use_values: Vec<f64>,
    history_limit: usize,
}

impl PerformanceTracker {
    pub fn new(num_longest: usize) -> Self {
        Self {
            window_start: Instant::now(),
            idle: Duration::ZERO,
            longest: Vec::with_capacity(num_longest + 1),
            num_longest,
            percent_use_values: Vec::new(),
            history_limit: MAX_PERCENT_USE_HISTORY,
        }
    }

    /// Keep at most `limit` percent-use samples
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        let excess = self.percent_use_values.len().saturating_sub(limit);
        self.percent_use_values.drain(..excess);
        self
    }

    /// Record one pass
    pub fn record(&mut self, iteration_time: Duration, idle_time: Duration) {
        self.idle += idle_time;

        if self.num_longest == 0 {
            return;
        }
        let pos = self.longest.partition_point(|d| *d <= iteration_time);
        self.longest.insert(pos, iteration_time);
        if self.longest.len() > self.num_longest {
            self.longest.remove(0);
        }
    }

    #[inline]
    pub fn start_timepoint(&self) -> Instant {
        self.window_start
    }

    #[inline]
    pub fn idle_time(&self) -> Duration {
        self.idle
    }

    #[inline]
    pub fn num_longest_iterations(&self) -> usize {
        self.num_longest
    }

    /// Percent use of the most recent windows, oldest first
    pub fn percent_use_values(&self) -> &[f64] {
        &self.percent_use_values
    }

    /// Close the current window and open a new one
    pub fn reset(&mut self) -> PerformanceReport {
        self.reset_at(Instant::now())
    }

    /// `reset()` with an explicit end of window
    pub fn reset_at(&mut self, now: Instant) -> PerformanceReport {
        let elapsed = now.saturating_duration_since(self.window_start);
        let percent_use = if elapsed.is_zero() {
            0.0
        } else {
            100.0 * (1.0 - self.idle.as_secs_f64() / elapsed.as_secs_f64())
        };
        self.percent_use_values.push(percent_use);
        if self.percent_use_values.len() > self.history_limit {
            self.percent_use_values.remove(0);
        }

        let report = PerformanceReport {
            start_timepoint: self.window_start,
            idle_iteration_time: self.idle,
            percent_use,
            longest_iterations: std::mem::take(&mut self.longest),
        };
        self.window_start = now;
        self.idle = Duration::ZERO;
        report
    }

    pub fn percent_use_metrics(&self) -> Option<PercentUseMetrics> {
        let values = &self.percent_use_values;
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let min = values.iter().copied().fold(f64::MAX, f64::min);
        let mean = values.iter().sum::<f64>() / n;
        let stdev = if values.len() < 2 {
            0.0
        } else {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        };
        Some(PercentUseMetrics {
            max,
            min,
            mean: round6(mean),
            stdev: round6(stdev),
        })
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(crate::config::defaults::NUM_LONGEST_ITERATIONS)
    }
}

#[inline]
fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
