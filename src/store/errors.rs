//! # Job Store Error Types

use thiserror::Error;

use crate::models::JobId;
use crate::state_machine::TransitionError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached. Fatal to the operation.
    #[error("Job store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Job store query failed: {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Job {job_id}: {source}")]
    InvalidTransition {
        job_id: JobId,
        #[source]
        source: TransitionError,
    },

    #[error("Job serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn job_not_found(job_id: JobId) -> Self {
        Self::JobNotFound { job_id }
    }

    pub fn invalid_transition(job_id: JobId, source: TransitionError) -> Self {
        Self::InvalidTransition { job_id, source }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Connection-level sqlx failures mean the store is unreachable; the rest
/// are query faults.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::unavailable(err.to_string()),
            other => Self::query("sql", other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
