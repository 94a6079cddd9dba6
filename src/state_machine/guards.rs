use chrono::{DateTime, Utc};
use thiserror::Error;

use super::events::JobEvent;
use super::states::JobState;
use crate::models::JobRecord;

/// Result of applying an event to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The job moved to a new state
    Applied,
    /// The job already was in the requested terminal state; nothing changed
    AlreadyInState,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot apply '{event}' to a job in state '{from}'")]
    InvalidTransition { from: JobState, event: &'static str },

    #[error("Job already reached terminal state '{current}', cannot apply '{event}'")]
    TerminalConflict {
        current: JobState,
        event: &'static str,
    },
}

/// Apply `event` to `record` in place.
///
/// Repeating a terminal event on a job already in that terminal state is a
/// no-op; a terminal event on a job in the other terminal state is a conflict.
/// `failed_reason` is cleared by every transition except `Fail`.
pub fn transition(
    record: &mut JobRecord,
    event: JobEvent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, TransitionError> {
    let from = record.state;
    let event_type = event.event_type();
    let invalid = || TransitionError::InvalidTransition {
        from,
        event: event_type,
    };

    match event {
        JobEvent::Claim => {
            if !record.is_claimable(now) {
                return Err(invalid());
            }
            record.state = JobState::Active;
        }
        JobEvent::Complete(result) => match from {
            JobState::Active => {
                record.state = JobState::Completed;
                record.return_value = result;
            }
            JobState::Completed => return Ok(TransitionOutcome::AlreadyInState),
            JobState::Failed => {
                return Err(TransitionError::TerminalConflict {
                    current: from,
                    event: event_type,
                })
            }
            _ => return Err(invalid()),
        },
        JobEvent::Fail(reason) => match from {
            JobState::Active => {
                record.state = JobState::Failed;
                record.last_error = Some(reason.clone());
                record.failed_reason = Some(reason);
                record.updated_at = now;
                return Ok(TransitionOutcome::Applied);
            }
            JobState::Failed => return Ok(TransitionOutcome::AlreadyInState),
            JobState::Completed => {
                return Err(TransitionError::TerminalConflict {
                    current: from,
                    event: event_type,
                })
            }
            _ => return Err(invalid()),
        },
        JobEvent::Retry { reason, delay } => {
            if from != JobState::Active {
                return Err(invalid());
            }
            record.attempt += 1;
            record.last_error = Some(reason);
            if delay.is_zero() {
                record.state = JobState::Waiting;
                record.run_at = now;
            } else {
                record.state = JobState::Delayed;
                record.run_at =
                    now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            }
        }
        JobEvent::Requeue => {
            if from != JobState::Active {
                return Err(invalid());
            }
            record.state = JobState::Waiting;
            record.run_at = now;
        }
    }

    record.failed_reason = None;
    record.updated_at = now;
    Ok(TransitionOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtraOptions, JobData, JobOptions, Operation, RecipientId};
    use std::time::Duration;
    use uuid::Uuid;

    fn active_job() -> JobRecord {
        let data = JobData::new(
            RecipientId::Id(1),
            &Operation::Text { text: "hi".into() },
            ExtraOptions::new(),
        )
        .unwrap();
        let mut job = JobRecord::new(Uuid::new_v4(), data, &JobOptions::default());
        transition(&mut job, JobEvent::Claim, Utc::now()).unwrap();
        job
    }

    #[test]
    fn test_claim_moves_waiting_to_active() {
        let job = active_job();
        assert_eq!(job.state, JobState::Active);
    }

    #[test]
    fn test_claim_rejects_active_job() {
        let mut job = active_job();
        let err = transition(&mut job, JobEvent::Claim, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_complete_is_idempotent() {
        let mut job = active_job();
        let first = transition(&mut job, JobEvent::Complete(None), Utc::now()).unwrap();
        let second = transition(&mut job, JobEvent::Complete(None), Utc::now()).unwrap();
        assert_eq!(first, TransitionOutcome::Applied);
        assert_eq!(second, TransitionOutcome::AlreadyInState);
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_fail_after_complete_conflicts() {
        let mut job = active_job();
        transition(&mut job, JobEvent::Complete(None), Utc::now()).unwrap();
        let err = transition(&mut job, JobEvent::Fail("boom".into()), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::TerminalConflict { .. }));
        assert!(job.failed_reason.is_none());
    }

    #[test]
    fn test_failed_reason_present_only_when_failed() {
        let mut job = active_job();
        transition(
            &mut job,
            JobEvent::Retry {
                reason: "429: Too Many Requests".into(),
                delay: Duration::from_millis(10),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.attempt, 1);
        assert!(job.failed_reason.is_none());
        assert_eq!(job.last_error.as_deref(), Some("429: Too Many Requests"));

        let later = Utc::now() + chrono::Duration::seconds(1);
        transition(&mut job, JobEvent::Claim, later).unwrap();
        transition(&mut job, JobEvent::Fail("403: Forbidden: blocked".into()), later).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some("403: Forbidden: blocked"));
    }

    #[test]
    fn test_retry_without_delay_goes_back_to_waiting() {
        let mut job = active_job();
        transition(
            &mut job,
            JobEvent::Retry {
                reason: "timeout".into(),
                delay: Duration::ZERO,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.state, JobState::Waiting);
    }

    #[test]
    fn test_requeue_only_from_active() {
        let mut job = active_job();
        transition(&mut job, JobEvent::Requeue, Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert!(transition(&mut job, JobEvent::Requeue, Utc::now()).is_err());
    }
}
