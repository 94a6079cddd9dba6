//! Shared fixtures for the integration tests: a scripted messaging client,
//! a fast engine configuration and a polling helper.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use broadcaster_core::config::{QueueOptions, RateLimitConfig, RetryConfig};
use broadcaster_core::{
    ApiCall, ApiError, ApiResponse, BroadcastStatus, Broadcaster, BroadcasterConfig, Deliverable,
};

/// Messaging client whose per-recipient outcomes are scripted in advance.
///
/// Recipients without a script (or whose script ran out) succeed.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<ApiError>>>,
    calls: Mutex<Vec<ApiCall>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next calls for `recipient` with these errors, in order
    pub fn script(self, recipient: i64, errors: Vec<ApiError>) -> Self {
        self.scripts
            .lock()
            .insert(recipient.to_string(), errors.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, recipient: i64) -> usize {
        let chat_id = json!(recipient);
        self.calls
            .lock()
            .iter()
            .filter(|call| call.get("chat_id") == Some(&chat_id))
            .count()
    }
}

#[async_trait]
impl Deliverable for ScriptedClient {
    async fn call_api(&self, call: &ApiCall) -> Result<ApiResponse, ApiError> {
        self.calls.lock().push(call.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = match call.get("chat_id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let scripted = self
            .scripts
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(error) => Err(error),
            None => Ok(ApiResponse(json!({ "message_id": 1, "chat": { "id": key } }))),
        }
    }

    fn client_name(&self) -> &'static str {
        "scripted"
    }
}

/// Config tuned so tests settle in milliseconds
pub fn fast_config() -> BroadcasterConfig {
    BroadcasterConfig {
        processes: 4,
        queue_options: QueueOptions {
            poll_interval_ms: 10,
            ..Default::default()
        },
        rate_limit: RateLimitConfig {
            max_calls_per_second: 10_000,
            burst: 10_000,
        },
        retry: RetryConfig {
            base_delay_ms: 5,
            max_delay_ms: 20,
            ..Default::default()
        },
        request_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub async fn engine(client: ScriptedClient) -> Broadcaster<Arc<ScriptedClient>> {
    engine_with(Arc::new(client), fast_config()).await
}

pub async fn engine_with(
    client: Arc<ScriptedClient>,
    config: BroadcasterConfig,
) -> Broadcaster<Arc<ScriptedClient>> {
    Broadcaster::in_memory(client, config)
        .await
        .expect("engine should start")
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `status()` until `check` accepts it or five seconds elapse
pub async fn wait_for_status<D, F>(broadcaster: &Broadcaster<D>, check: F) -> bool
where
    D: Deliverable,
    F: Fn(&BroadcastStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(status) = broadcaster.status().await {
            if check(&status) {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until nothing is waiting, active or delayed
pub async fn wait_settled<D: Deliverable>(broadcaster: &Broadcaster<D>) -> bool {
    wait_for_status(broadcaster, BroadcastStatus::is_settled).await
}

/// Wait until every job of the latest dispatch was counted
pub async fn wait_progress_complete<D: Deliverable>(broadcaster: &Broadcaster<D>) -> bool {
    wait_until(Duration::from_secs(2), || broadcaster.progress() >= 100.0).await
}

pub fn transient() -> ApiError {
    ApiError::api(429, "Too Many Requests: retry after 0")
}

pub fn blocked() -> ApiError {
    ApiError::api(403, "Forbidden: bot was blocked by the user")
}
