//! Environment variable utilities
//!
//! # Usage
//!
//! ```ignore
//! use loopvisor_core::env::{env_get, env_get_bool, env_get_duration_ms};
//!
//! let keep: usize = env_get("LVR_NUM_LONGEST_ITERATIONS", 5);
//! let poll = env_get_duration_ms("LVR_PAUSE_POLL_MS", 10);
//! let flush = env_get_bool("LVR_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true. Any other
/// set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as a millisecond duration
#[inline]
pub fn env_get_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "__LVR_TEST_UNSET_VAR__";

    #[test]
    fn test_defaults_when_unset() {
        let val: usize = env_get(UNSET, 42);
        assert_eq!(val, 42);
        assert!(env_get_bool(UNSET, true));
        assert_eq!(env_get_opt::<u64>(UNSET), None);
        assert_eq!(env_get_str(UNSET, "hello"), "hello");
        assert_eq!(env_get_duration_ms(UNSET, 15), Duration::from_millis(15));
        assert!(!env_is_set(UNSET));
    }

    #[test]
    fn test_parsed_values() {
        std::env::set_var("__LVR_TEST_MS__", " 250 ");
        assert_eq!(env_get_duration_ms("__LVR_TEST_MS__", 0), Duration::from_millis(250));
        std::env::set_var("__LVR_TEST_MS__", "soon");
        assert_eq!(env_get_duration_ms("__LVR_TEST_MS__", 7), Duration::from_millis(7));
        std::env::remove_var("__LVR_TEST_MS__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, want) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("nah", false)] {
            std::env::set_var("__LVR_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__LVR_TEST_BOOL__", !want), want, "{}", raw);
        }
        std::env::remove_var("__LVR_TEST_BOOL__");
    }
}
