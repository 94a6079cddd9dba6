//! # Broadcaster Configuration
//!
//! Explicit configuration passed to the engine at construction. There are no
//! process-wide defaults: every [`Broadcaster`](crate::Broadcaster) owns its
//! own [`BroadcasterConfig`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broadcaster_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Loads config/broadcaster.toml, the environment overlay and BROADCASTER__* variables
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! println!("{} workers draining '{}'", config.processes, config.queue_name);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;
use crate::models::JobOptions;

/// Longest accepted queue name
pub const MAX_QUEUE_NAME_LENGTH: usize = 64;

/// Root engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Number of concurrent workers
    pub processes: usize,
    /// Durable queue instance name
    pub queue_name: String,
    pub job_options: JobOptionsConfig,
    pub queue_options: QueueOptions,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    /// Per-call timeout; a timed out call is a transient failure
    pub request_timeout_ms: u64,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            processes: defaults::PROCESSES,
            queue_name: defaults::QUEUE_NAME.to_string(),
            job_options: JobOptionsConfig::default(),
            queue_options: QueueOptions::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

/// Per-job durable-store settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobOptionsConfig {
    /// Total attempts per job, the first included
    pub attempts: u32,
    /// Hold new jobs back this long before they become claimable
    pub delay_ms: u64,
}

impl Default for JobOptionsConfig {
    fn default() -> Self {
        Self {
            attempts: defaults::JOB_ATTEMPTS,
            delay_ms: 0,
        }
    }
}

impl JobOptionsConfig {
    pub fn to_job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.attempts,
            delay: (self.delay_ms > 0).then(|| Duration::from_millis(self.delay_ms)),
        }
    }
}

/// Durable-store connection settings
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// How long an idle worker sleeps before polling the store again
    pub poll_interval_ms: u64,
    /// Active jobs untouched this long are requeued at start-up
    pub stalled_after_ms: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            stalled_after_ms: defaults::STALLED_AFTER_MS,
        }
    }
}

impl std::fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueOptions")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_connections", &self.max_connections)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("stalled_after_ms", &self.stalled_after_ms)
            .finish()
    }
}

impl QueueOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stalled_after(&self) -> Duration {
        Duration::from_millis(self.stalled_after_ms)
    }
}

/// Outbound call rate limit shared by all workers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls_per_second: u32,
    /// Calls allowed back to back before the rate applies
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_second: defaults::MAX_CALLS_PER_SECOND,
            burst: defaults::MAX_CALLS_PER_SECOND,
        }
    }
}

/// Backoff and transient/permanent classification
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub classification: ClassificationConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            classification: ClassificationConfig::default(),
        }
    }
}

/// Which API errors are worth retrying.
///
/// Errors matching none of these rules are permanent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Retry API errors that carry no error code
    pub retry_on_missing_code: bool,
    /// Codes that are always retried (flood control)
    pub retry_codes: Vec<i64>,
    /// Codes at or above this are server-side and retried
    pub retry_at_or_above: i64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            retry_on_missing_code: true,
            retry_codes: defaults::RETRY_CODES.to_vec(),
            retry_at_or_above: defaults::RETRY_AT_OR_ABOVE,
        }
    }
}

impl BroadcasterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.processes == 0 {
            return Err(ConfigurationError::invalid_value(
                "processes",
                self.processes,
                "at least one worker is required",
            ));
        }

        if self.queue_name.is_empty() || self.queue_name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ConfigurationError::invalid_value(
                "queue_name",
                &self.queue_name,
                "queue name must be 1 to 64 characters",
            ));
        }
        if !self
            .queue_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigurationError::invalid_value(
                "queue_name",
                &self.queue_name,
                "only ASCII letters, digits, '_' and '-' are allowed",
            ));
        }

        if self.job_options.attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "job_options.attempts",
                0,
                "attempts must be at least 1",
            ));
        }

        if self.queue_options.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_options.max_connections",
                0,
                "pool size must be greater than 0",
            ));
        }
        if self.queue_options.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_options.poll_interval_ms",
                0,
                "poll interval must be greater than 0",
            ));
        }

        if self.rate_limit.max_calls_per_second == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.max_calls_per_second",
                0,
                "rate must be greater than 0",
            ));
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier,
                "multiplier must be a finite number >= 1.0",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.retry.max_delay_ms,
                "max delay must not be below base delay",
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "request_timeout_ms",
                0,
                "timeout must be greater than 0",
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_capacity",
                0,
                "capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BroadcasterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_name, "broadcast");
        assert_eq!(config.job_options.attempts, 3);
        assert_eq!(config.retry.classification.retry_codes, vec![429]);
    }

    #[test]
    fn test_zero_processes_rejected() {
        let config = BroadcasterConfig {
            processes: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("processes"));
    }

    #[test]
    fn test_queue_name_charset() {
        for bad in ["", "has space", "semi;colon", &"x".repeat(65)] {
            let config = BroadcasterConfig {
                queue_name: bad.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
        let config = BroadcasterConfig {
            queue_name: "news-digest_2".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_job_options_conversion() {
        let options = JobOptionsConfig {
            attempts: 5,
            delay_ms: 0,
        }
        .to_job_options();
        assert_eq!(options.max_attempts, 5);
        assert!(options.delay.is_none());

        let options = JobOptionsConfig {
            attempts: 1,
            delay_ms: 250,
        }
        .to_job_options();
        assert_eq!(options.delay, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_queue_options_debug_hides_url() {
        let options = QueueOptions {
            database_url: Some("postgres://user:hunter2@db/broadcast".into()),
            ..Default::default()
        };
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
