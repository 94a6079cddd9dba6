//! Pause, resume, reset and terminate against a running engine

mod common;

use std::sync::Arc;
use std::time::Duration;

use broadcaster_core::{Broadcaster, InMemoryJobStore, JobStore};
use common::{
    blocked, engine, fast_config, wait_for_status, wait_progress_complete, wait_settled,
    ScriptedClient,
};

#[tokio::test]
async fn test_pause_stops_claims_and_resume_continues() {
    let broadcaster = engine(ScriptedClient::new()).await;

    broadcaster.pause().await.unwrap();
    assert!(broadcaster.is_paused().await.unwrap());

    broadcaster
        .send_text(vec![1_i64, 2, 3], "Later", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.waiting_count, 3);
    assert_eq!(status.completed_count, 0);

    broadcaster.resume().await.unwrap();
    assert!(!broadcaster.is_paused().await.unwrap());
    assert!(wait_settled(&broadcaster).await);
    assert_eq!(broadcaster.status().await.unwrap().completed_count, 3);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_reset_wipes_every_state() {
    let client = ScriptedClient::new().script(2, vec![blocked()]);
    let broadcaster = engine(client).await;

    broadcaster
        .send_text(vec![1_i64, 2, 3], "First campaign", None)
        .await
        .unwrap();
    assert!(wait_settled(&broadcaster).await);

    broadcaster.pause().await.unwrap();
    broadcaster
        .send_text(vec![4_i64, 5], "Second campaign", None)
        .await
        .unwrap();

    let report = broadcaster.reset().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.waiting, 2);
    assert_eq!(report.total(), 5);

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.total(), 0);
    assert_eq!(broadcaster.progress(), 100.0);
    let session = broadcaster.session();
    assert_eq!((session.processed, session.total), (0, 0));

    // Reset leaves the pause flag as it found it
    assert!(broadcaster.is_paused().await.unwrap());
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_terminate_keeps_terminal_history() {
    let client = ScriptedClient::new().script(2, vec![blocked()]);
    let broadcaster = engine(client).await;

    broadcaster
        .send_text(vec![1_i64, 2, 3], "Audited", None)
        .await
        .unwrap();
    assert!(wait_settled(&broadcaster).await);
    let before = broadcaster.status().await.unwrap();
    assert_eq!((before.completed_count, before.failed_count), (2, 1));

    broadcaster.pause().await.unwrap();
    broadcaster
        .send_text(vec![10_i64, 11, 12, 13], "Aborted", None)
        .await
        .unwrap();

    let report = broadcaster.terminate().await.unwrap();
    assert_eq!(report.waiting, 4);
    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 0);

    let after = broadcaster.status().await.unwrap();
    assert_eq!(after.waiting_count, 0);
    assert_eq!(after.active_count, 0);
    assert_eq!(after.completed_count, before.completed_count);
    assert_eq!(after.failed_count, before.failed_count);
    assert_eq!(broadcaster.progress(), 100.0);

    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_terminate_waits_for_in_flight_calls() {
    let client = ScriptedClient::new().with_delay(Duration::from_millis(100));
    let broadcaster = engine(client).await;

    broadcaster
        .send_text((1..=20_i64).collect::<Vec<_>>(), "Busy", None)
        .await
        .unwrap();
    assert!(wait_for_status(&broadcaster, |status| status.active_count > 0).await);

    broadcaster.terminate().await.unwrap();

    let status = broadcaster.status().await.unwrap();
    assert_eq!(status.waiting_count, 0);
    assert_eq!(status.active_count, 0);
    assert_eq!(status.delayed_count, 0);
    // Calls already running were allowed to finish
    assert!(status.completed_count > 0);
    assert!(status.completed_count < 20);

    // The engine was running before, so it is running again
    assert!(!broadcaster.is_paused().await.unwrap());
    broadcaster.shutdown().await;
}

#[tokio::test]
async fn test_reset_then_new_campaign() {
    let broadcaster = engine(ScriptedClient::new()).await;

    broadcaster.send_text(vec![1_i64], "Old", None).await.unwrap();
    assert!(wait_settled(&broadcaster).await);
    broadcaster.reset().await.unwrap();

    broadcaster
        .send_text(vec![2_i64, 3], "New", None)
        .await
        .unwrap();
    assert!(wait_settled(&broadcaster).await);
    assert!(wait_progress_complete(&broadcaster).await);
    assert_eq!(broadcaster.status().await.unwrap().completed_count, 2);

    broadcaster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_handle_never_claims() {
    let client = Arc::new(ScriptedClient::new());
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let mut control = Broadcaster::control(Arc::clone(&client), store, fast_config())
        .await
        .unwrap();
    assert!(!control.has_workers());

    control
        .send_text(vec![1_i64, 2, 3, 4, 5], "Queued", None)
        .await
        .unwrap();
    let status = control.status().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(status.waiting_count, 5);
    assert_eq!(control.status().await.unwrap().waiting_count, 5);

    control.pause().await.unwrap();
    control.resume().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.calls().is_empty());

    control.start_workers().await.unwrap();
    assert!(control.has_workers());
    assert!(wait_settled(&control).await);
    assert_eq!(client.calls().len(), 5);

    control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_terminate_waits_for_workers_elsewhere() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let slow = Arc::new(ScriptedClient::new().with_delay(Duration::from_millis(100)));
    let worker = Broadcaster::new(Arc::clone(&slow), Arc::clone(&store), fast_config())
        .await
        .unwrap();
    let control = Broadcaster::control(Arc::new(ScriptedClient::new()), store, fast_config())
        .await
        .unwrap();

    control
        .send_text((1..=20_i64).collect::<Vec<_>>(), "Busy", None)
        .await
        .unwrap();
    assert!(wait_for_status(&control, |status| status.active_count > 0).await);

    let report = control.terminate().await.unwrap();
    assert_eq!(report.active, 0);

    let status = control.status().await.unwrap();
    assert_eq!(status.waiting_count, 0);
    assert_eq!(status.active_count, 0);
    assert!(status.completed_count > 0);
    assert!(status.completed_count < 20);
    assert!(!control.is_paused().await.unwrap());

    worker.shutdown().await;
}
