use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::constants::events;
use crate::models::{JobId, JobRecord};

/// Something observable that happened to a broadcast
#[derive(Debug, Clone)]
pub enum BroadcastEvent {
    /// A job reached `completed`
    Processed { job: JobRecord },
    /// A job reached `failed`, either permanently or after its last attempt
    Failed { job: JobRecord },
    /// A job failed transiently and was put back for another attempt
    Retrying {
        job_id: JobId,
        attempt: u32,
        reason: String,
    },
    /// No claimable job is left in the queue
    Drained { batch_id: Option<Uuid> },
}

impl BroadcastEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Processed { .. } => events::JOB_PROCESSED,
            Self::Failed { .. } => events::JOB_FAILED,
            Self::Retrying { .. } => events::JOB_RETRYING,
            Self::Drained { .. } => events::QUEUE_DRAINED,
        }
    }
}

/// Event with its publication time
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: BroadcastEvent,
    pub published_at: DateTime<Utc>,
}

type JobListener = Arc<dyn Fn(&JobRecord) + Send + Sync>;
type DrainListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    processed: Vec<JobListener>,
    failed: Vec<JobListener>,
    drained: Vec<DrainListener>,
}

/// Fans events out to registered callbacks and channel subscribers.
///
/// Callbacks run synchronously on the worker that produced the event and
/// must not block. Channel subscribers that fall behind lose the oldest
/// events.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<PublishedEvent>,
    listeners: Arc<RwLock<Listeners>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventHub")
            .field("subscribers", &self.sender.receiver_count())
            .field("processed_listeners", &listeners.processed.len())
            .field("failed_listeners", &listeners.failed.len())
            .field("drained_listeners", &listeners.drained.len())
            .finish()
    }
}

impl EventHub {
    /// Create a hub with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Listeners::default())),
        }
    }

    pub fn on_processed<F>(&self, callback: F)
    where
        F: Fn(&JobRecord) + Send + Sync + 'static,
    {
        self.listeners.write().processed.push(Arc::new(callback));
    }

    pub fn on_failed<F>(&self, callback: F)
    where
        F: Fn(&JobRecord) + Send + Sync + 'static,
    {
        self.listeners.write().failed.push(Arc::new(callback));
    }

    pub fn on_drained<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.write().drained.push(Arc::new(callback));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: BroadcastEvent) {
        // Snapshot so callbacks may register further listeners without deadlocking
        let (job_listeners, drain_listeners) = {
            let listeners = self.listeners.read();
            match &event {
                BroadcastEvent::Processed { .. } => (listeners.processed.clone(), Vec::new()),
                BroadcastEvent::Failed { .. } => (listeners.failed.clone(), Vec::new()),
                BroadcastEvent::Drained { .. } => (Vec::new(), listeners.drained.clone()),
                BroadcastEvent::Retrying { .. } => (Vec::new(), Vec::new()),
            }
        };

        match &event {
            BroadcastEvent::Processed { job } | BroadcastEvent::Failed { job } => {
                for listener in &job_listeners {
                    listener(job);
                }
            }
            BroadcastEvent::Drained { .. } => {
                for listener in &drain_listeners {
                    listener();
                }
            }
            BroadcastEvent::Retrying { .. } => {}
        }

        let name = event.name();
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };
        // No subscribers is fine
        if self.sender.send(published).is_err() && self.sender.receiver_count() > 0 {
            warn!(event = name, "Failed to publish broadcast event");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(crate::constants::defaults::EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtraOptions, JobData, JobOptions, Operation, RecipientId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job() -> JobRecord {
        let data = JobData::new(
            RecipientId::Id(1),
            &Operation::Dice { emoji: None },
            ExtraOptions::new(),
        )
        .unwrap();
        JobRecord::new(Uuid::new_v4(), data, &JobOptions::default())
    }

    #[test]
    fn test_listeners_receive_only_their_events() {
        let hub = EventHub::new(16);
        let processed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&processed);
        hub.on_processed(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let f = Arc::clone(&failed);
        hub.on_failed(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(BroadcastEvent::Processed { job: job() });
        hub.publish(BroadcastEvent::Processed { job: job() });
        hub.publish(BroadcastEvent::Failed { job: job() });

        assert_eq!(processed.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        hub.publish(BroadcastEvent::Drained { batch_id: None });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "drained");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let hub = EventHub::default();
        hub.publish(BroadcastEvent::Drained { batch_id: None });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
