//! Lifecycle controls: pause, resume, reset and terminate.
//!
//! `reset` and `terminate` pause the queue and let in-flight calls settle
//! before wiping anything, then put the pause flag back the way they found it.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::Broadcaster;
use crate::error::Result;
use crate::logging::log_lifecycle_operation;
use crate::messaging::Deliverable;
use crate::state_machine::JobState;

/// Extra time on top of the request timeout to wait for busy workers
const SETTLE_GRACE: Duration = Duration::from_secs(5);

/// Records removed per state by a wipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleanupReport {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl CleanupReport {
    fn record(&mut self, state: JobState, removed: u64) {
        match state {
            JobState::Waiting => self.waiting += removed,
            JobState::Active => self.active += removed,
            JobState::Delayed => self.delayed += removed,
            JobState::Completed => self.completed += removed,
            JobState::Failed => self.failed += removed,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.delayed + self.completed + self.failed
    }
}

impl<D: Deliverable> Broadcaster<D> {
    /// Stop claiming new jobs. In-flight calls finish normally.
    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn pause(&self) -> Result<()> {
        self.store.pause().await?;
        info!("⏸️ Broadcast paused");
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn resume(&self) -> Result<()> {
        self.store.resume().await?;
        self.pool.wake();
        info!("▶️ Broadcast resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self.store.is_paused().await?)
    }

    /// Wipe every record in every state and zero the session counters
    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn reset(&self) -> Result<CleanupReport> {
        let report = self.wipe(&JobState::ALL).await?;
        self.session.reset();
        log_lifecycle_operation("reset", &self.config.queue_name, report.total(), "ok");
        Ok(report)
    }

    /// Abort the current campaign: drop pending work, keep completed and
    /// failed records for auditing
    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn terminate(&self) -> Result<CleanupReport> {
        let report = self
            .wipe(&[JobState::Waiting, JobState::Active, JobState::Delayed])
            .await?;
        self.session.close();
        log_lifecycle_operation("terminate", &self.config.queue_name, report.total(), "ok");
        Ok(report)
    }

    /// Workers of other processes only show up as `active` records
    async fn wait_store_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.store.count_by_state(JobState::Active).await? == 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.queue_options.poll_interval()).await;
        }
    }

    async fn wipe(&self, states: &[JobState]) -> Result<CleanupReport> {
        let was_paused = self.store.is_paused().await?;
        self.store.pause().await?;

        let settle = self.config.request_timeout() + SETTLE_GRACE;
        if self.has_workers() {
            if !self.pool.wait_idle(settle).await {
                warn!(
                    in_flight = self.pool.in_flight(),
                    "Workers still busy, wiping anyway"
                );
            }
        } else if !self.wait_store_idle(settle).await? {
            warn!("Jobs still active in another process, wiping anyway");
        }

        let mut report = CleanupReport::default();
        let result = async {
            for &state in states {
                let removed = self.store.remove_by_state(state, Duration::ZERO).await?;
                report.record(state, removed);
            }
            Ok::<_, crate::store::StoreError>(())
        }
        .await;

        if !was_paused {
            self.store.resume().await?;
            self.pool.wake();
        }
        result?;

        Ok(report)
    }
}
