use serde_json::Value;
use std::time::Duration;

/// Events that can trigger job state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A worker claims the job
    Claim,
    /// Delivery succeeded, with the API response if any
    Complete(Option<Value>),
    /// Delivery failed for good
    Fail(String),
    /// Delivery failed transiently; try again after the delay
    Retry { reason: String, delay: Duration },
    /// A stalled active job is handed back to the queue
    Requeue,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
            Self::Retry { .. } => "retry",
            Self::Requeue => "requeue",
        }
    }
}
