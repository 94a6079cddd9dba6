//! # Worker Pool
//!
//! `processes` tokio tasks draining the job store. Each worker loops:
//!
//! ```text
//! claim ─▶ rate limit ─▶ invoke (with timeout) ─▶ classify ─▶ transition ─▶ count + events
//!   │
//!   └─ nothing claimable: sleep until woken, polled, or shut down
//! ```
//!
//! Workers only look at the shutdown signal between jobs, so a stopping or
//! paused pool always finishes the call it is making.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::rate_limiter::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy};
use crate::broadcaster::BroadcastSession;
use crate::dispatch::{DispatchError, DispatchRouter};
use crate::events::{BroadcastEvent, EventHub};
use crate::logging::log_job_operation;
use crate::messaging::{ApiError, Deliverable};
use crate::models::JobRecord;
use crate::store::{JobStore, StoreError};

/// Everything a worker needs, shared by all workers of a pool
pub struct WorkerContext<D: Deliverable> {
    pub store: Arc<dyn JobStore>,
    pub router: DispatchRouter<D>,
    pub session: Arc<BroadcastSession>,
    pub events: EventHub,
    pub retry: RetryPolicy,
    pub limiter: Arc<RateLimiter>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

/// Busy-worker bookkeeping, used to wait for in-flight calls
#[derive(Debug, Default)]
struct PoolActivity {
    in_flight: AtomicUsize,
    idle: Notify,
    /// Set by claims and dispatches, cleared when a drain is reported
    has_work: AtomicBool,
}

impl PoolActivity {
    fn start(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded set of workers draining one job store
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    activity: Arc<PoolActivity>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `processes` workers. Must be called inside a tokio runtime.
    pub fn start<D: Deliverable>(context: Arc<WorkerContext<D>>, processes: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let activity = Arc::new(PoolActivity::default());

        let handles = (0..processes)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    context: Arc::clone(&context),
                    activity: Arc::clone(&activity),
                    wake: Arc::clone(&wake),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = processes, "🚀 Worker pool started");

        Self {
            handles: Mutex::new(handles),
            shutdown,
            wake,
            activity,
            size: processes,
        }
    }

    /// A pool without workers, for handles that only enqueue and inspect
    pub fn idle() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handles: Mutex::new(Vec::new()),
            shutdown,
            wake: Arc::new(Notify::new()),
            activity: Arc::new(PoolActivity::default()),
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently claiming or processing a job
    pub fn in_flight(&self) -> usize {
        self.activity.in_flight.load(Ordering::SeqCst)
    }

    /// New jobs were enqueued: wake idle workers and arm the drain report
    pub fn notify_work(&self) {
        self.activity.has_work.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Wake idle workers without announcing new work
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    /// Wait until no worker is mid-claim or mid-call. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let activity = Arc::clone(&self.activity);
        tokio::time::timeout(timeout, async move {
            loop {
                let notified = activity.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if activity.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Stop all workers after their current job and wait for them
    pub async fn shutdown(&self) {
        if self.size == 0 {
            return;
        }
        // send_replace never fails, even with every receiver gone
        self.shutdown.send_replace(true);
        self.wake.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("🛑 Worker pool stopped");
    }
}

struct Worker<D: Deliverable> {
    id: usize,
    context: Arc<WorkerContext<D>>,
    activity: Arc<PoolActivity>,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl<D: Deliverable> Worker<D> {
    async fn run(mut self) {
        debug!(worker_id = self.id, "Worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.activity.start();
            let claimed = self.context.store.claim_next().await;
            match claimed {
                Ok(Some(job)) => {
                    self.activity.has_work.store(true, Ordering::SeqCst);
                    self.process(job).await;
                    self.activity.finish();
                    continue;
                }
                Ok(None) => {
                    self.activity.finish();
                    self.report_drained().await;
                }
                Err(e) => {
                    self.activity.finish();
                    error!(worker_id = self.id, error = %e, "Failed to claim job");
                }
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    // Sender gone means the pool itself was dropped
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.context.poll_interval) => {}
            }
        }

        debug!(worker_id = self.id, "Worker stopped");
    }

    /// Emit `Drained` once per transition from "had work" to "nothing claimable"
    async fn report_drained(&self) {
        if !self.activity.has_work.load(Ordering::SeqCst) {
            return;
        }
        // A paused queue looks empty but is not drained
        match self.context.store.is_paused().await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "Could not read pause flag");
                return;
            }
        }
        if self.activity.has_work.swap(false, Ordering::SeqCst) {
            let batch_id = self.context.session.current_batch();
            debug!(worker_id = self.id, batch_id = ?batch_id, "Queue drained");
            self.context.events.publish(BroadcastEvent::Drained { batch_id });
        }
    }

    async fn process(&self, job: JobRecord) {
        let ctx = &self.context;
        ctx.limiter.acquire().await;

        let result = match tokio::time::timeout(ctx.request_timeout, ctx.router.invoke(&job.data))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Api(ApiError::timeout(ctx.request_timeout))),
        };

        match result {
            Ok(response) => self.complete(&job, response.into_value()).await,
            Err(error) => self.fail(&job, error).await,
        }
    }

    async fn complete(&self, job: &JobRecord, response: Value) {
        match self.context.store.mark_completed(job.id, Some(response)).await {
            Ok(transition) if transition.is_applied() => {
                log_job_operation(
                    "deliver",
                    Some(&job.id.to_string()),
                    Some(&job.recipient_id().to_string()),
                    Some(job.attempt),
                    "completed",
                    None,
                );
                self.finish_terminal(BroadcastEvent::Processed {
                    job: transition.record,
                });
            }
            Ok(_) => debug!(job_id = %job.id, "Job already completed"),
            Err(e) => self.report_store_error(job, "mark_completed", e),
        }
    }

    async fn fail(&self, job: &JobRecord, error: DispatchError) {
        let reason = error.to_string();
        let delivery = self.context.retry.classifier().delivery_error(&error);

        match self.context.retry.decide(job, &error) {
            RetryDecision::Retry { delay } => {
                match self
                    .context
                    .store
                    .schedule_retry(job.id, &reason, delay)
                    .await
                {
                    Ok(record) => {
                        warn!(
                            job_id = %job.id,
                            recipient = %job.recipient_id(),
                            attempt = record.attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %delivery,
                            "Retrying delivery"
                        );
                        self.activity.has_work.store(true, Ordering::SeqCst);
                        self.context.events.publish(BroadcastEvent::Retrying {
                            job_id: job.id,
                            attempt: record.attempt,
                            reason,
                        });
                    }
                    Err(e) => self.report_store_error(job, "schedule_retry", e),
                }
            }
            RetryDecision::Fail => match self.context.store.mark_failed(job.id, &reason).await {
                Ok(transition) if transition.is_applied() => {
                    log_job_operation(
                        "deliver",
                        Some(&job.id.to_string()),
                        Some(&job.recipient_id().to_string()),
                        Some(job.attempt),
                        "failed",
                        Some(&delivery.to_string()),
                    );
                    self.finish_terminal(BroadcastEvent::Failed {
                        job: transition.record,
                    });
                }
                Ok(_) => debug!(job_id = %job.id, "Job already failed"),
                Err(e) => self.report_store_error(job, "mark_failed", e),
            },
        }
    }

    /// Count the outcome towards the session, then tell listeners
    fn finish_terminal(&self, event: BroadcastEvent) {
        let batch_id = match &event {
            BroadcastEvent::Processed { job } | BroadcastEvent::Failed { job } => job.batch_id,
            _ => return,
        };
        if let Some(snapshot) = self.context.session.record_terminal(batch_id) {
            debug!(
                processed = snapshot.processed,
                total = snapshot.total,
                "Broadcast progress"
            );
        }
        self.context.events.publish(event);
    }

    fn report_store_error(&self, job: &JobRecord, operation: &str, error: StoreError) {
        if error.is_not_found() {
            // Removed by reset/terminate while the call was in flight
            debug!(job_id = %job.id, operation = operation, "Job removed while in flight");
        } else {
            error!(
                job_id = %job.id,
                operation = operation,
                error = %error,
                "Job store operation failed"
            );
        }
    }
}
