//! # Job Records
//!
//! One job per recipient of a broadcast. The job data is what gets persisted
//! and what the failure formatter reports back as `data`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::operation::{ExtraOptions, Operation, OperationKind};
use crate::error::Result;
use crate::state_machine::JobState;

/// Opaque job identifier assigned by the store at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Chat, user or channel a message is delivered to.
///
/// Numeric ids cover users, groups and channels; `@username` strings
/// address public channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientId {
    Id(i64),
    Username(String),
}

impl RecipientId {
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Id(id) => *id != 0,
            Self::Username(name) => {
                name.len() > 1
                    && name.starts_with('@')
                    && name[1..]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
        }
    }

    /// JSON value as sent in a `chat_id` argument
    pub fn to_value(&self) -> Value {
        match self {
            Self::Id(id) => Value::from(*id),
            Self::Username(name) => Value::from(name.clone()),
        }
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => f.write_str(name),
        }
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RecipientId {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<i64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Username(trimmed.to_string()),
        }
    }
}

impl From<String> for RecipientId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Persisted description of one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    pub recipient_id: RecipientId,
    pub operation_kind: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "ExtraOptions::is_empty")]
    pub extra: ExtraOptions,
}

impl JobData {
    pub fn new(
        recipient_id: RecipientId,
        operation: &Operation,
        extra: ExtraOptions,
    ) -> Result<Self> {
        let (kind, payload) = operation.to_parts()?;
        Ok(Self {
            recipient_id,
            operation_kind: kind.as_str().to_string(),
            payload,
            extra,
        })
    }

    /// Decode the typed operation. Fails for kinds this build does not know.
    pub fn operation(&self) -> Result<Operation> {
        Operation::from_parts(&self.operation_kind, self.payload.clone())
    }

    pub fn kind(&self) -> Result<OperationKind> {
        self.operation_kind.parse()
    }
}

/// Per-job store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Total delivery attempts allowed, including the first
    pub max_attempts: u32,
    /// Enqueue as `delayed` and hold back until the delay elapses
    pub delay: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: None,
        }
    }
}

/// A job as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Dispatch call this job belongs to
    pub batch_id: Uuid,
    pub data: JobData,
    pub state: JobState,
    /// Attempts made so far
    pub attempt: u32,
    pub max_attempts: u32,
    /// Set only while the job is `failed`
    pub failed_reason: Option<String>,
    /// Most recent transient error, kept across retries
    pub last_error: Option<String>,
    pub return_value: Option<Value>,
    /// Earliest time the job may be claimed
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(batch_id: Uuid, data: JobData, options: &JobOptions) -> Self {
        let now = Utc::now();
        let (state, run_at) = match options.delay {
            Some(delay) if !delay.is_zero() => (
                JobState::Delayed,
                now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
            ),
            _ => (JobState::Waiting, now),
        };

        Self {
            id: JobId::new(),
            batch_id,
            data,
            state,
            attempt: 0,
            max_attempts: options.max_attempts.max(1),
            failed_reason: None,
            last_error: None,
            return_value: None,
            run_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn recipient_id(&self) -> &RecipientId {
        &self.data.recipient_id
    }

    /// Whether another attempt is allowed after the current one fails
    pub fn has_attempts_left(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }

    /// Claimable now: waiting, or delayed with its run time reached
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.run_at <= now,
            _ => false,
        }
    }
}
