//! End-to-end broadcast scenarios against the in-memory store

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use broadcaster_core::store::{JobTransition, StoreResult};
use broadcaster_core::{
    BroadcastError, BroadcastEvent, Broadcaster, CopySource, ExtraOptions, FailedReason,
    InMemoryJobStore, JobId, JobRecord, JobState, JobStore, MediaGroupItem, MediaGroupKind,
    RecipientId, StoreError,
};
use common::{
    blocked, engine, engine_with, fast_config, transient, wait_progress_complete, wait_settled,
    wait_until, ScriptedClient,
};

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let client = ScriptedClient::new().script(3, vec![transient(), transient()]);
    let broadcaster = engine(client).await;

    broadcaster
        .send_text(vec![1_i64, 2, 3, 4, 5], "Maintenance tonight", None)
        .await
        .unwrap();

    assert!(wait_settled(&broadcaster).await, "queue never settled");
    assert!(wait_progress_complete(&broadcaster).await);

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.completed_count, 5);
    assert_eq!(status.failed_count, 0);
    assert_eq!(broadcaster.progress(), 100.0);
    assert_eq!(broadcaster.router().client().calls_for(3), 3);
    assert_eq!(broadcaster.router().client().calls_for(1), 1);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let client = ScriptedClient::new().script(2, vec![blocked()]);
    let broadcaster = engine(client).await;

    broadcaster
        .send_text(vec![1_i64, 2, 3], "Hello", None)
        .await
        .unwrap();
    assert!(wait_settled(&broadcaster).await);

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.completed_count, 2);
    assert_eq!(status.failed_count, 1);

    let failed = broadcaster.failed_jobs(None).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_id(), &RecipientId::Id(2));
    assert_eq!(failed[0].attempt, 0);
    assert_eq!(broadcaster.router().client().calls_for(2), 1);

    let formatted = broadcaster.failed_formatted(None).await.unwrap();
    assert_eq!(
        formatted[0].failed_reason,
        Some(FailedReason::Structured {
            code: 403,
            status: "Forbidden".into(),
            message: "bot was blocked by the user".into(),
        })
    );

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let client = ScriptedClient::new().script(7, vec![transient(), transient(), transient()]);
    let broadcaster = engine(client).await;

    broadcaster.send_text(vec![7_i64], "Hi", None).await.unwrap();
    assert!(wait_settled(&broadcaster).await);

    let failed = broadcaster.failed_jobs(None).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempt, 2);
    assert_eq!(broadcaster.router().client().calls_for(7), 3);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_enqueues_one_job_per_recipient() {
    let broadcaster = engine(ScriptedClient::new()).await;
    broadcaster.pause().await.unwrap();

    broadcaster
        .send_text(vec!["155054210", "@channel_name", "42"], "Queued", None)
        .await
        .unwrap();

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.waiting_count, 3);
    assert_eq!(status.total(), 3);
    assert_eq!(broadcaster.progress(), 0.0);
    assert!(broadcaster.router().client().calls().is_empty());

    broadcaster.resume().await.unwrap();
    assert!(wait_settled(&broadcaster).await);
    assert_eq!(broadcaster.status().await.unwrap().completed_count, 3);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_invalid_recipients_rejected_before_enqueue() {
    let broadcaster = engine(ScriptedClient::new()).await;

    let err = broadcaster
        .send_text(Vec::<i64>::new(), "Hi", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidRecipients { .. }));

    let err = broadcaster
        .send_text(vec!["@ok_user", "not a username"], "Hi", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidRecipients { .. }));

    assert_eq!(broadcaster.status().await.unwrap().total(), 0);
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_invalid_payload_rejected_before_enqueue() {
    let broadcaster = engine(ScriptedClient::new()).await;

    let err = broadcaster
        .send_poll(vec![1_i64], "Lunch?", vec!["Pizza".into()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidPayload { .. }));

    let err = broadcaster.send_text(vec![1_i64], "   ", None).await.unwrap_err();
    assert!(err.is_validation_error());

    assert_eq!(broadcaster.status().await.unwrap().total(), 0);
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_events_fire_per_terminal_job() {
    let client = ScriptedClient::new().script(2, vec![blocked()]);
    let broadcaster = engine(client).await;

    let processed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&processed);
    broadcaster.on_processed(move |_| {
        p.fetch_add(1, Ordering::SeqCst);
    });
    let f = Arc::clone(&failed);
    broadcaster.on_failed(move |job| {
        assert_eq!(job.recipient_id(), &RecipientId::Id(2));
        f.fetch_add(1, Ordering::SeqCst);
    });
    let d = Arc::clone(&drained);
    broadcaster.on_drained(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    broadcaster
        .send_text(vec![1_i64, 2, 3, 4], "Hello", None)
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || drained.load(Ordering::SeqCst) >= 1).await,
        "drained never fired"
    );
    // Drained only means nothing is left to claim; the last calls may still be in flight
    assert!(
        wait_until(Duration::from_secs(5), || {
            processed.load(Ordering::SeqCst) + failed.load(Ordering::SeqCst) == 4
        })
        .await
    );
    assert_eq!(processed.load(Ordering::SeqCst), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 1);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_retrying_events_reach_subscribers() {
    let client = ScriptedClient::new().script(9, vec![transient()]);
    let broadcaster = engine(client).await;
    let mut events = broadcaster.subscribe();

    broadcaster.send_text(vec![9_i64], "Hi", None).await.unwrap();

    let mut saw_retry = false;
    let mut saw_processed = false;
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(published) = events.recv().await {
            match published.event {
                BroadcastEvent::Retrying { attempt, .. } => {
                    assert_eq!(attempt, 1);
                    saw_retry = true;
                }
                BroadcastEvent::Processed { .. } => {
                    saw_processed = true;
                    break;
                }
                _ => {}
            }
        }
    })
    .await;

    assert!(outcome.is_ok());
    assert!(saw_retry && saw_processed);
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_copy_and_media_group_route_to_their_methods() {
    let broadcaster = engine(ScriptedClient::new()).await;

    broadcaster
        .copy_message(vec![11_i64], CopySource::Chat(RecipientId::Id(-100200)), 77, None)
        .await
        .unwrap();
    broadcaster
        .send_media_group(
            vec![12_i64],
            vec![
                MediaGroupItem::new(MediaGroupKind::Photo, "photo-a"),
                MediaGroupItem::new(MediaGroupKind::Photo, "photo-b").with_caption("second"),
            ],
            Some(ExtraOptions::new().with("disable_notification", true)),
        )
        .await
        .unwrap();

    assert!(wait_settled(&broadcaster).await);
    let calls = broadcaster.router().client().calls();
    let copy = calls.iter().find(|c| c.method == "copyMessage").unwrap();
    assert_eq!(copy.get("from_chat_id"), Some(&serde_json::json!(-100200)));
    assert_eq!(copy.get("message_id"), Some(&serde_json::json!(77)));

    let group = calls.iter().find(|c| c.method == "sendMediaGroup").unwrap();
    assert_eq!(
        group.get("disable_notification"),
        Some(&serde_json::json!(true))
    );

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_new_dispatch_restarts_progress() {
    let broadcaster = engine(ScriptedClient::new()).await;

    broadcaster.send_text(vec![1_i64, 2], "First", None).await.unwrap();
    assert!(wait_settled(&broadcaster).await);
    assert!(wait_progress_complete(&broadcaster).await);

    broadcaster.pause().await.unwrap();
    broadcaster
        .send_text(vec![3_i64, 4, 5, 6], "Second", None)
        .await
        .unwrap();
    let session = broadcaster.session();
    assert_eq!(session.total, 4);
    assert_eq!(session.processed, 0);
    assert_eq!(broadcaster.progress(), 0.0);

    broadcaster.resume().await.unwrap();
    assert!(wait_settled(&broadcaster).await);
    assert!(wait_progress_complete(&broadcaster).await);
    assert_eq!(broadcaster.status().await.unwrap().completed_count, 6);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_request_timeout_is_transient() {
    let client = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(200)));
    let config = broadcaster_core::BroadcasterConfig {
        request_timeout_ms: 50,
        job_options: broadcaster_core::config::JobOptionsConfig {
            attempts: 2,
            delay_ms: 0,
        },
        ..fast_config()
    };
    let broadcaster = engine_with(Arc::clone(&client), config).await;

    broadcaster.send_text(vec![5_i64], "Slow", None).await.unwrap();
    assert!(wait_settled(&broadcaster).await);

    let failed = broadcaster.failed_jobs(None).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempt, 1);
    assert_eq!(client.calls_for(5), 2);

    broadcaster.shutdown().await;
}

/// Store whose writes fail as if the database went away
#[derive(Default)]
struct UnreachableStore {
    inner: InMemoryJobStore,
}

#[async_trait]
impl JobStore for UnreachableStore {
    async fn enqueue(&self, _record: JobRecord) -> StoreResult<JobId> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn enqueue_batch(&self, _records: Vec<JobRecord>) -> StoreResult<Vec<JobId>> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn claim_next(&self) -> StoreResult<Option<JobRecord>> {
        self.inner.claim_next().await
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: Option<Value>,
    ) -> StoreResult<JobTransition> {
        self.inner.mark_completed(id, result).await
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> StoreResult<JobTransition> {
        self.inner.mark_failed(id, reason).await
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        delay: Duration,
    ) -> StoreResult<JobRecord> {
        self.inner.schedule_retry(id, reason, delay).await
    }

    async fn requeue_stalled(&self, stalled_after: Duration) -> StoreResult<u64> {
        self.inner.requeue_stalled(stalled_after).await
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn count_by_state(&self, state: JobState) -> StoreResult<u64> {
        self.inner.count_by_state(state).await
    }

    async fn list_by_state(
        &self,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JobRecord>> {
        self.inner.list_by_state(state, limit).await
    }

    async fn remove_by_state(&self, state: JobState, older_than: Duration) -> StoreResult<u64> {
        self.inner.remove_by_state(state, older_than).await
    }

    async fn pause(&self) -> StoreResult<()> {
        self.inner.pause().await
    }

    async fn resume(&self) -> StoreResult<()> {
        self.inner.resume().await
    }

    async fn is_paused(&self) -> StoreResult<bool> {
        self.inner.is_paused().await
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_store_outage_reaches_dispatch_caller() {
    let client = Arc::new(ScriptedClient::new());
    let broadcaster = Broadcaster::new(
        Arc::clone(&client),
        Arc::new(UnreachableStore::default()),
        fast_config(),
    )
    .await
    .unwrap();

    let err = broadcaster
        .send_text(vec![1_i64, 2, 3], "Lost", None)
        .await
        .unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(matches!(
        err,
        BroadcastError::Store(StoreError::Unavailable { .. })
    ));

    // The abandoned batch does not leave a half-counted session behind
    let session = broadcaster.session();
    assert_eq!((session.processed, session.total), (0, 0));
    assert_eq!(session.batch_id, None);
    assert_eq!(broadcaster.progress(), 100.0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(client.calls().is_empty());
    broadcaster.shutdown().await;
}
