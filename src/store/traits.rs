//! # Job Store Contract
//!
//! What the engine needs from a durable job queue. Implementations must
//! serialize every state transition per job so that a claimed job is handed
//! to exactly one caller; count queries may lag in-flight claims.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::StoreResult;
use crate::models::{JobId, JobRecord};
use crate::state_machine::{JobState, TransitionOutcome};

/// A job after a terminal transition, with whether anything changed
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub outcome: TransitionOutcome,
    pub record: JobRecord,
}

impl JobTransition {
    pub fn is_applied(&self) -> bool {
        self.outcome.is_applied()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Persist one record as given (`waiting` or `delayed`)
    async fn enqueue(&self, record: JobRecord) -> StoreResult<JobId>;

    /// Persist all records or none of them
    async fn enqueue_batch(&self, records: Vec<JobRecord>) -> StoreResult<Vec<JobId>>;

    /// Atomically move the next claimable record to `active` and return it.
    ///
    /// Returns `None` when nothing is claimable or the queue is paused.
    async fn claim_next(&self) -> StoreResult<Option<JobRecord>>;

    /// Terminal success. Repeating it is a no-op; it conflicts with `failed`.
    async fn mark_completed(&self, id: JobId, result: Option<Value>)
        -> StoreResult<JobTransition>;

    /// Terminal failure. Repeating it is a no-op; it conflicts with `completed`.
    async fn mark_failed(&self, id: JobId, reason: &str) -> StoreResult<JobTransition>;

    /// Put an active record back for another attempt after `delay`
    async fn schedule_retry(&self, id: JobId, reason: &str, delay: Duration)
        -> StoreResult<JobRecord>;

    /// Return records stuck in `active` longer than `stalled_after` to `waiting`
    async fn requeue_stalled(&self, stalled_after: Duration) -> StoreResult<u64>;

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>>;

    async fn count_by_state(&self, state: JobState) -> StoreResult<u64>;

    /// Records in `state`, oldest first
    async fn list_by_state(&self, state: JobState, limit: Option<usize>)
        -> StoreResult<Vec<JobRecord>>;

    /// Delete records in `state` last touched at least `older_than` ago
    async fn remove_by_state(&self, state: JobState, older_than: Duration) -> StoreResult<u64>;

    async fn pause(&self) -> StoreResult<()>;

    async fn resume(&self) -> StoreResult<()>;

    async fn is_paused(&self) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
