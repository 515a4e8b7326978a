//! # Engine Configuration
//!
//! YAML-based configuration for the engine-wide knobs, with environment
//! overlays and env-var overrides for the scalar values. Per-step settings
//! (timeout, retry count, retry interval, duplicate policy) are not
//! configuration; they live on [`crate::models::StepDefinition`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stepline_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (path and environment from STEPLINE_CONFIG/STEPLINE_ENV)
//! let config = ConfigLoader::load()?;
//! let interval = config.polling_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use crate::constants::{
    DEFAULT_DUPLICATE_WINDOW_HOURS, DEFAULT_MAX_CAPTURED_OUTPUT_BYTES,
    DEFAULT_POLLING_INTERVAL_MS, DEFAULT_POLL_FAILURE_BACKOFF_MS, DEFAULT_POLL_FAILURE_RETRY_LIMIT,
    TRUNCATION_MARKER,
};

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_poll_failure_retry_limit() -> u32 {
    DEFAULT_POLL_FAILURE_RETRY_LIMIT
}

fn default_poll_failure_backoff_ms() -> u64 {
    DEFAULT_POLL_FAILURE_BACKOFF_MS
}

fn default_max_captured_output_bytes() -> usize {
    DEFAULT_MAX_CAPTURED_OUTPUT_BYTES
}

fn default_duplicate_window_hours() -> i64 {
    DEFAULT_DUPLICATE_WINDOW_HOURS
}

/// Engine-wide tuning knobs shared by every step task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between polls of an external system or of the shared store.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Consecutive transient poll failures tolerated before the attempt
    /// fails.
    #[serde(default = "default_poll_failure_retry_limit")]
    pub poll_failure_retry_limit: u32,

    /// Delay between poll-failure retries.
    #[serde(default = "default_poll_failure_backoff_ms")]
    pub poll_failure_backoff_ms: u64,

    /// Cap on persisted remote output, in bytes.
    #[serde(default = "default_max_captured_output_bytes")]
    pub max_captured_output_bytes: usize,

    /// Lookback window of the duplicate-attempt check.
    #[serde(default = "default_duplicate_window_hours")]
    pub duplicate_window_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            poll_failure_retry_limit: DEFAULT_POLL_FAILURE_RETRY_LIMIT,
            poll_failure_backoff_ms: DEFAULT_POLL_FAILURE_BACKOFF_MS,
            max_captured_output_bytes: DEFAULT_MAX_CAPTURED_OUTPUT_BYTES,
            duplicate_window_hours: DEFAULT_DUPLICATE_WINDOW_HOURS,
        }
    }
}

impl EngineConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn poll_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_failure_backoff_ms)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.duplicate_window_hours)
    }

    /// Validate the loaded configuration. No silent clamping: out-of-range
    /// values are reported, not repaired.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.polling_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling_interval_ms",
                self.polling_interval_ms.to_string(),
                "must be greater than zero",
            ));
        }
        if self.poll_failure_retry_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "poll_failure_retry_limit",
                self.poll_failure_retry_limit.to_string(),
                "at least one poll try is required",
            ));
        }
        if self.max_captured_output_bytes <= TRUNCATION_MARKER.len() {
            return Err(ConfigurationError::invalid_value(
                "max_captured_output_bytes",
                self.max_captured_output_bytes.to_string(),
                "must leave room beyond the truncation marker",
            ));
        }
        if self.duplicate_window_hours <= 0 {
            return Err(ConfigurationError::invalid_value(
                "duplicate_window_hours",
                self.duplicate_window_hours.to_string(),
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling_interval(), Duration::from_secs(10));
        assert_eq!(config.duplicate_window(), chrono::Duration::hours(24));
    }

    #[test]
    fn zero_polling_interval_is_rejected() {
        let config = EngineConfig {
            polling_interval_ms: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn output_cap_must_exceed_marker() {
        let config = EngineConfig {
            max_captured_output_bytes: 4,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: EngineConfig = serde_yaml::from_str("polling_interval_ms: 250").unwrap();
        assert_eq!(config.polling_interval_ms, 250);
        assert_eq!(config.poll_failure_retry_limit, 3);
        assert_eq!(config.max_captured_output_bytes, 512 * 1024);
    }
}
