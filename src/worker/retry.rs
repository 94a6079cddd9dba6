//! # Failure Classification and Retry Policy
//!
//! Decides what happens to a job whose API call failed:
//!
//! - timeouts and network failures are always transient
//! - API errors are transient when their code matches the configured rules
//!   (missing code, an explicit code list, or at/above a threshold)
//! - everything else is permanent and never retried
//!
//! Transient failures are retried with exponential backoff until the job's
//! attempts run out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ClassificationConfig, RetryConfig};
use crate::dispatch::DispatchError;
use crate::error::BroadcastError;
use crate::messaging::{ApiError, ApiErrorKind};
use crate::models::JobRecord;

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Permanent,
    Transient,
}

/// Classifies delivery failures by error code
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    config: ClassificationConfig,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(ClassificationConfig::default())
    }
}

impl FailureClassifier {
    pub fn new(config: ClassificationConfig) -> Self {
        Self { config }
    }

    pub fn classify_api_error(&self, error: &ApiError) -> FailureClass {
        match error.kind {
            ApiErrorKind::Timeout | ApiErrorKind::Network => FailureClass::Transient,
            ApiErrorKind::Api => match error.code {
                None if self.config.retry_on_missing_code => FailureClass::Transient,
                None => FailureClass::Permanent,
                Some(code)
                    if self.config.retry_codes.contains(&code)
                        || code >= self.config.retry_at_or_above =>
                {
                    FailureClass::Transient
                }
                Some(_) => FailureClass::Permanent,
            },
        }
    }

    /// Jobs the router could not even shape are permanent failures
    pub fn classify(&self, error: &DispatchError) -> FailureClass {
        match error {
            DispatchError::Unroutable(_) => FailureClass::Permanent,
            DispatchError::Api(api) => self.classify_api_error(api),
        }
    }

    /// The failure as a crate error, for logs and listeners
    pub fn delivery_error(&self, error: &DispatchError) -> BroadcastError {
        match self.classify(error) {
            FailureClass::Permanent => BroadcastError::permanent_delivery(error.to_string()),
            FailureClass::Transient => BroadcastError::transient_delivery(error.to_string()),
        }
    }
}

/// What to do with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail,
}

/// Exponential backoff capped at `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    classifier: FailureClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            classifier: FailureClassifier::new(config.classification.clone()),
        }
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Backoff before retry number `attempt + 1`, never shorter than the
    /// upstream `retry_after` hint
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64)
            .max(0.0);
        let delay = Duration::from_millis(millis as u64);
        match retry_after {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }

    pub fn decide(&self, job: &JobRecord, error: &DispatchError) -> RetryDecision {
        if self.classifier.classify(error) == FailureClass::Permanent || !job.has_attempts_left() {
            return RetryDecision::Fail;
        }
        let retry_after = match error {
            DispatchError::Api(api) => api.retry_after,
            DispatchError::Unroutable(_) => None,
        };
        RetryDecision::Retry {
            delay: self.backoff(job.attempt, retry_after),
        }
    }
}
