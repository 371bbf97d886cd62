//! Worker configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (runtime, `from_env()` only)
//! 3. Library defaults (`defaults` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use loopvisor_core::config::WorkerConfig;
//!
//! let config = WorkerConfig::from_env()
//!     .minimum_iteration_duration(Duration::ZERO)
//!     .logging_level(LogLevel::Debug);
//! ```

pub mod defaults;

use std::time::Duration;

use crate::env::{env_get, env_get_duration_ms};
use crate::error::ConfigError;
use crate::kprint::LogLevel;
use crate::kprintln;

/// Worker configuration with builder pattern.
///
/// Fixed once the worker is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Floor on the duration of one loop pass
    pub minimum_iteration_duration: Duration,
    /// Threshold for the worker's own lifecycle log lines
    pub logging_level: LogLevel,
    /// Sleep between polls while paused
    pub pause_poll_interval: Duration,
    /// Join timeout used by `hard_stop()`; `None` waits forever
    pub hard_stop_timeout: Option<Duration>,
    /// Longest iteration durations kept per performance window
    pub num_longest_iterations: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl WorkerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `LVR_MIN_ITERATION_MS` - Minimum iteration duration in milliseconds
    /// - `LVR_WORKER_LOG_LEVEL` - off, error, warn, info, debug, trace (or 0-5)
    /// - `LVR_PAUSE_POLL_MS` - Pause poll interval in milliseconds
    /// - `LVR_HARD_STOP_TIMEOUT_MS` - Hard stop join timeout, 0 = no timeout
    /// - `LVR_NUM_LONGEST_ITERATIONS` - Longest iterations kept per window
    pub fn from_env() -> Self {
        let hard_stop_ms: u64 = env_get("LVR_HARD_STOP_TIMEOUT_MS", defaults::HARD_STOP_TIMEOUT_MS);
        Self {
            minimum_iteration_duration: env_get_duration_ms(
                "LVR_MIN_ITERATION_MS",
                defaults::MIN_ITERATION_MS,
            ),
            logging_level: env_get("LVR_WORKER_LOG_LEVEL", defaults::LOGGING_LEVEL),
            pause_poll_interval: env_get_duration_ms("LVR_PAUSE_POLL_MS", defaults::PAUSE_POLL_MS),
            hard_stop_timeout: timeout_from_ms(hard_stop_ms),
            num_longest_iterations: env_get(
                "LVR_NUM_LONGEST_ITERATIONS",
                defaults::NUM_LONGEST_ITERATIONS,
            ),
        }
    }

    /// Create config with library defaults only (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            minimum_iteration_duration: Duration::from_millis(defaults::MIN_ITERATION_MS),
            logging_level: defaults::LOGGING_LEVEL,
            pause_poll_interval: Duration::from_millis(defaults::PAUSE_POLL_MS),
            hard_stop_timeout: timeout_from_ms(defaults::HARD_STOP_TIMEOUT_MS),
            num_longest_iterations: defaults::NUM_LONGEST_ITERATIONS,
        }
    }

    // Builder methods

    pub fn minimum_iteration_duration(mut self, d: Duration) -> Self {
        self.minimum_iteration_duration = d;
        self
    }

    pub fn logging_level(mut self, level: LogLevel) -> Self {
        self.logging_level = level;
        self
    }

    pub fn pause_poll_interval(mut self, d: Duration) -> Self {
        self.pause_poll_interval = d;
        self
    }

    pub fn hard_stop_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hard_stop_timeout = timeout;
        self
    }

    pub fn num_longest_iterations(mut self, n: usize) -> Self {
        self.num_longest_iterations = n;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pause_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("pause_poll_interval must be > 0"));
        }
        if self.pause_poll_interval > Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue("pause_poll_interval must be <= 1s"));
        }
        if self.hard_stop_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "hard_stop_timeout must be > 0 (use None to wait forever)",
            ));
        }
        if self.num_longest_iterations > 1024 {
            return Err(ConfigError::InvalidValue("num_longest_iterations must be <= 1024"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("Worker Configuration:");
        kprintln!("  minimum_iteration_duration: {:?}", self.minimum_iteration_duration);
        kprintln!("  logging_level:              {:?}", self.logging_level);
        kprintln!("  pause_poll_interval:        {:?}", self.pause_poll_interval);
        kprintln!("  hard_stop_timeout:          {:?}", self.hard_stop_timeout);
        kprintln!("  num_longest_iterations:     {}", self.num_longest_iterations);
    }
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = WorkerConfig::new();
        assert_eq!(config.minimum_iteration_duration, Duration::from_millis(10));
        assert_eq!(config.logging_level, LogLevel::Info);
        assert_eq!(config.hard_stop_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("LVR_NUM_LONGEST_ITERATIONS", "7");
        let config = WorkerConfig::from_env();
        std::env::remove_var("LVR_NUM_LONGEST_ITERATIONS");
        assert_eq!(config.num_longest_iterations, 7);
    }

    #[test]
    fn test_builder() {
        let config = WorkerConfig::new()
            .minimum_iteration_duration(Duration::from_millis(230))
            .logging_level(LogLevel::Debug)
            .hard_stop_timeout(Some(Duration::from_millis(200)));

        assert_eq!(config.minimum_iteration_duration, Duration::from_millis(230));
        assert_eq!(config.logging_level, LogLevel::Debug);
        assert_eq!(config.hard_stop_timeout, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_validation() {
        let config = WorkerConfig::new().pause_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = WorkerConfig::new().hard_stop_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());

        let config = WorkerConfig::new().num_longest_iterations(5000);
        assert!(config.validate().is_err());
    }
}
