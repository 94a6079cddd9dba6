use serde::{Deserialize, Serialize};
use std::fmt;

/// Job state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued and ready to be claimed
    Waiting,
    /// Claimed by exactly one worker
    Active,
    /// Held back until its run time (initial delay or retry backoff)
    Delayed,
    /// Delivered
    Completed,
    /// Delivery failed permanently or exhausted its attempts
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        Self::Waiting,
        Self::Active,
        Self::Delayed,
        Self::Completed,
        Self::Failed,
    ];

    /// Waiting or delayed: a worker may claim it once its run time arrives
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "delayed" => Ok(Self::Delayed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Default state for new jobs
impl Default for JobState {
    fn default() -> Self {
        Self::Waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_pending_check() {
        assert!(JobState::Waiting.is_pending());
        assert!(JobState::Delayed.is_pending());
        assert!(!JobState::Active.is_pending());
        assert!(!JobState::Completed.is_pending());
        assert!(!JobState::Failed.is_pending());
    }

    #[test]
    fn test_state_string_conversion() {
        for state in JobState::ALL {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("wait".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&JobState::Delayed).unwrap();
        assert_eq!(json, "\"delayed\"");

        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobState::Delayed);
    }
}
