//! # In-Memory Job Store
//!
//! Process-local [`JobStore`] for tests and ephemeral runs. A single mutex
//! serializes every transition, which makes claims trivially exclusive.
//! Pending records are also indexed by `(run_at, seq)`, so a claim never
//! walks completed history. Nothing survives a restart.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::traits::{JobStore, JobTransition};
use crate::models::{JobId, JobRecord};
use crate::state_machine::{transition, JobEvent, JobState};

/// Claim order: earliest run time first, then insertion order
type ClaimKey = (DateTime<Utc>, u64, JobId);

#[derive(Debug)]
struct StoredJob {
    /// Insertion order, the FIFO tie-breaker for claims
    seq: u64,
    record: JobRecord,
}

impl StoredJob {
    fn claim_key(&self) -> ClaimKey {
        (self.record.run_at, self.seq, self.record.id)
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    jobs: HashMap<JobId, StoredJob>,
    /// Keys of every `waiting` or `delayed` record
    pending: BTreeSet<ClaimKey>,
    next_seq: u64,
    paused: bool,
}

impl InMemoryState {
    fn insert(&mut self, record: JobRecord) -> JobId {
        let id = record.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        let stored = StoredJob { seq, record };
        if stored.record.state.is_pending() {
            self.pending.insert(stored.claim_key());
        }
        self.jobs.insert(id, stored);
        id
    }

    fn apply(&mut self, id: JobId, event: JobEvent) -> StoreResult<JobTransition> {
        let stored = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::job_not_found(id))?;
        let before = stored.claim_key();
        let outcome = transition(&mut stored.record, event, Utc::now())
            .map_err(|e| StoreError::invalid_transition(id, e))?;

        self.pending.remove(&before);
        if stored.record.state.is_pending() {
            self.pending.insert(stored.claim_key());
        }
        Ok(JobTransition {
            outcome,
            record: stored.record.clone(),
        })
    }

    fn next_claimable(&self, now: DateTime<Utc>) -> Option<JobId> {
        self.pending
            .iter()
            .map(|&(_, _, id)| id)
            .find(|id| {
                self.jobs
                    .get(id)
                    .is_some_and(|job| job.record.is_claimable(now))
            })
    }
}

/// Mutex-guarded [`JobStore`]
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records held, any state
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cutoff(older_than: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, record: JobRecord) -> StoreResult<JobId> {
        Ok(self.state.lock().insert(record))
    }

    async fn enqueue_batch(&self, records: Vec<JobRecord>) -> StoreResult<Vec<JobId>> {
        let mut state = self.state.lock();
        Ok(records.into_iter().map(|r| state.insert(r)).collect())
    }

    async fn claim_next(&self) -> StoreResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        if state.paused {
            return Ok(None);
        }

        let Some(id) = state.next_claimable(now) else {
            return Ok(None);
        };
        let claimed = state.apply(id, JobEvent::Claim)?;
        debug!(job_id = %id, "Claimed job");
        Ok(Some(claimed.record))
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: Option<Value>,
    ) -> StoreResult<JobTransition> {
        self.state.lock().apply(id, JobEvent::Complete(result))
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> StoreResult<JobTransition> {
        self.state.lock().apply(id, JobEvent::Fail(reason.to_string()))
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        delay: Duration,
    ) -> StoreResult<JobRecord> {
        let event = JobEvent::Retry {
            reason: reason.to_string(),
            delay,
        };
        Ok(self.state.lock().apply(id, event)?.record)
    }

    async fn requeue_stalled(&self, stalled_after: Duration) -> StoreResult<u64> {
        let threshold = cutoff(stalled_after);
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut requeued = 0;
        for job in state.jobs.values_mut() {
            if job.record.state == JobState::Active && job.record.updated_at <= threshold {
                transition(&mut job.record, JobEvent::Requeue, now)
                    .map_err(|e| StoreError::invalid_transition(job.record.id, e))?;
                state.pending.insert(job.claim_key());
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.state.lock().jobs.get(&id).map(|job| job.record.clone()))
    }

    async fn count_by_state(&self, state: JobState) -> StoreResult<u64> {
        let guard = self.state.lock();
        Ok(guard
            .jobs
            .values()
            .filter(|job| job.record.state == state)
            .count() as u64)
    }

    async fn list_by_state(
        &self,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JobRecord>> {
        let guard = self.state.lock();
        let mut jobs: Vec<&StoredJob> = guard
            .jobs
            .values()
            .filter(|job| job.record.state == state)
            .collect();
        jobs.sort_by_key(|job| job.seq);
        Ok(jobs
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|job| job.record.clone())
            .collect())
    }

    async fn remove_by_state(&self, state: JobState, older_than: Duration) -> StoreResult<u64> {
        let threshold = cutoff(older_than);
        let mut guard = self.state.lock();
        let InMemoryState { jobs, pending, .. } = &mut *guard;
        let before = jobs.len();
        jobs.retain(|_, job| {
            let expired = job.record.state == state && job.record.updated_at <= threshold;
            if expired {
                pending.remove(&job.claim_key());
            }
            !expired
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn pause(&self) -> StoreResult<()> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> StoreResult<()> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> StoreResult<bool> {
        Ok(self.state.lock().paused)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
