//! # Broadcaster
//!
//! The public engine. A [`Broadcaster`] owns one job store, one worker pool
//! and one long-lived [`BroadcastSession`]; every `send_*` call expands its
//! recipients into job records and returns as soon as they are enqueued.
//! Per-recipient outcomes are observed through [`Broadcaster::status`],
//! [`Broadcaster::failed_jobs`] and the event callbacks, never as errors of
//! the dispatch call itself.
//!
//! ```rust,no_run
//! use broadcaster_core::{Broadcaster, BroadcasterConfig, TelegramBotApi};
//!
//! # async fn example() -> broadcaster_core::Result<()> {
//! let api = TelegramBotApi::from_token("123456:bot-token")?;
//! let broadcaster = Broadcaster::in_memory(api, BroadcasterConfig::default()).await?;
//!
//! broadcaster.on_failed(|job| eprintln!("gave up on {}", job.recipient_id()));
//! broadcaster
//!     .send_text(vec![155054210_i64, 200300400], "Maintenance tonight at 22:00", None)
//!     .await?;
//!
//! println!("{:.0}% done", broadcaster.progress());
//! # Ok(())
//! # }
//! ```

mod lifecycle;
pub mod session;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub use lifecycle::CleanupReport;
pub use session::{BroadcastSession, SessionSnapshot};

use crate::config::BroadcasterConfig;
use crate::dispatch::DispatchRouter;
use crate::error::{BroadcastError, Result};
use crate::events::{EventHub, PublishedEvent};
use crate::formatter::{format_failed_job, FormattedFailedJob};
use crate::messaging::Deliverable;
use crate::models::{
    ChatAction, CopySource, ExtraOptions, JobData, JobOptions, JobRecord, MediaGroupItem,
    Operation, RecipientId,
};
use crate::state_machine::JobState;
use crate::store::{InMemoryJobStore, JobStore, PgJobStore};
use crate::worker::{RateLimiter, RetryPolicy, WorkerContext, WorkerPool};

/// Job counts per state at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BroadcastStatus {
    pub waiting_count: u64,
    pub active_count: u64,
    pub delayed_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
}

impl BroadcastStatus {
    pub fn total(&self) -> u64 {
        self.waiting_count
            + self.active_count
            + self.delayed_count
            + self.completed_count
            + self.failed_count
    }

    /// Nothing left to claim or in flight
    pub fn is_settled(&self) -> bool {
        self.waiting_count == 0 && self.active_count == 0 && self.delayed_count == 0
    }
}

/// Fan-out engine over one job store
pub struct Broadcaster<D: Deliverable> {
    config: BroadcasterConfig,
    store: Arc<dyn JobStore>,
    router: DispatchRouter<D>,
    session: Arc<BroadcastSession>,
    events: EventHub,
    pool: WorkerPool,
    job_options: JobOptions,
}

impl<D: Deliverable> std::fmt::Debug for Broadcaster<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("queue", &self.config.queue_name)
            .field("store", &self.store.provider_name())
            .field("router", &self.router)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<D: Deliverable> Broadcaster<D> {
    /// Build the engine over an existing store and start its workers.
    ///
    /// Records left `active` by a crashed process are requeued first.
    pub async fn new(
        client: D,
        store: Arc<dyn JobStore>,
        config: BroadcasterConfig,
    ) -> Result<Self> {
        let mut broadcaster = Self::control(client, store, config).await?;
        broadcaster.start_workers().await?;
        Ok(broadcaster)
    }

    /// Open the store without starting any workers.
    ///
    /// The handle enqueues, reports and drives the lifecycle controls, but
    /// never claims a job until [`Broadcaster::start_workers`] is called.
    #[instrument(skip(client, store, config), fields(queue = %config.queue_name))]
    pub async fn control(
        client: D,
        store: Arc<dyn JobStore>,
        config: BroadcasterConfig,
    ) -> Result<Self> {
        config.validate()?;
        store.health_check().await?;

        let router = DispatchRouter::new(Arc::new(client));
        let events = EventHub::new(config.event_capacity);

        debug!(
            store = store.provider_name(),
            client = router.client().client_name(),
            "Broadcaster opened"
        );

        Ok(Self {
            job_options: config.job_options.to_job_options(),
            config,
            store,
            router,
            session: Arc::new(BroadcastSession::new()),
            events,
            pool: WorkerPool::idle(),
        })
    }

    /// Spawn `processes` workers. A no-op when they already run.
    #[instrument(skip(self), fields(queue = %self.config.queue_name))]
    pub async fn start_workers(&mut self) -> Result<()> {
        if self.pool.size() > 0 {
            return Ok(());
        }

        let requeued = self
            .store
            .requeue_stalled(self.config.queue_options.stalled_after())
            .await?;
        if requeued > 0 {
            warn!(requeued = requeued, "Requeued stalled jobs from a previous run");
        }

        let context = Arc::new(WorkerContext {
            store: Arc::clone(&self.store),
            router: self.router.clone(),
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            retry: RetryPolicy::from_config(&self.config.retry),
            limiter: Arc::new(RateLimiter::new(&self.config.rate_limit)),
            request_timeout: self.config.request_timeout(),
            poll_interval: self.config.queue_options.poll_interval(),
        });
        self.pool = WorkerPool::start(context, self.config.processes);

        let pending = self.store.count_by_state(JobState::Waiting).await?
            + self.store.count_by_state(JobState::Delayed).await?;
        if pending > 0 {
            self.pool.notify_work();
        }

        info!(
            store = self.store.provider_name(),
            client = self.router.client().client_name(),
            workers = self.config.processes,
            pending = pending,
            "✅ Broadcaster ready"
        );
        Ok(())
    }

    /// Whether this handle runs its own workers
    pub fn has_workers(&self) -> bool {
        self.pool.size() > 0
    }

    /// Engine over a fresh [`InMemoryJobStore`]
    pub async fn in_memory(client: D, config: BroadcasterConfig) -> Result<Self> {
        Self::new(client, Arc::new(InMemoryJobStore::new()), config).await
    }

    /// Engine over a [`PgJobStore`] at `queue_options.database_url`
    pub async fn connect(client: D, config: BroadcasterConfig) -> Result<Self> {
        let store = open_pg_store(&config).await?;
        Self::new(client, Arc::new(store), config).await
    }

    /// Control handle over a [`PgJobStore`], see [`Broadcaster::control`]
    pub async fn connect_control(client: D, config: BroadcasterConfig) -> Result<Self> {
        let store = open_pg_store(&config).await?;
        Self::control(client, Arc::new(store), config).await
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn router(&self) -> &DispatchRouter<D> {
        &self.router
    }

    /// Validate and enqueue one job per recipient.
    ///
    /// Fails synchronously with `InvalidRecipients` or `InvalidPayload`
    /// before anything is enqueued. Returns once every record is stored.
    #[instrument(skip_all, fields(queue = %self.config.queue_name, kind = %operation.kind()))]
    pub async fn dispatch<I, R>(
        &self,
        recipients: I,
        operation: Operation,
        extra: ExtraOptions,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let recipients: Vec<RecipientId> = recipients.into_iter().map(Into::into).collect();
        if recipients.is_empty() {
            return Err(BroadcastError::invalid_recipients(
                "at least one recipient is required",
            ));
        }
        if let Some(bad) = recipients.iter().find(|r| !r.is_valid()) {
            return Err(BroadcastError::invalid_recipients(format!(
                "'{bad}' is not a valid recipient id"
            )));
        }
        operation.validate()?;

        let (kind, payload) = operation.to_parts()?;
        let batch_id = self.session.begin(recipients.len() as u64);
        let records: Vec<JobRecord> = recipients
            .into_iter()
            .map(|recipient_id| {
                let data = JobData {
                    recipient_id,
                    operation_kind: kind.as_str().to_string(),
                    payload: payload.clone(),
                    extra: extra.clone(),
                };
                JobRecord::new(batch_id, data, &self.job_options)
            })
            .collect();
        let total = records.len();

        if let Err(e) = self.store.enqueue_batch(records).await {
            self.session.abandon(batch_id);
            return Err(e.into());
        }
        self.pool.notify_work();

        info!(batch_id = %batch_id, recipients = total, "📨 Broadcast enqueued");
        Ok(self)
    }

    pub async fn send_text<I, R>(
        &self,
        recipients: I,
        text: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Text { text: text.into() };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    /// Copy an existing message to every recipient
    pub async fn copy_message<I, R>(
        &self,
        recipients: I,
        source: CopySource,
        message_id: i64,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Copy { source, message_id };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_photo<I, R>(
        &self,
        recipients: I,
        photo: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Photo {
            photo: photo.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_document<I, R>(
        &self,
        recipients: I,
        document: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Document {
            document: document.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_audio<I, R>(
        &self,
        recipients: I,
        audio: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Audio {
            audio: audio.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_video<I, R>(
        &self,
        recipients: I,
        video: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Video {
            video: video.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_voice<I, R>(
        &self,
        recipients: I,
        voice: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Voice {
            voice: voice.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_video_note<I, R>(
        &self,
        recipients: I,
        video_note: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::VideoNote {
            video_note: video_note.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_animation<I, R>(
        &self,
        recipients: I,
        animation: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Animation {
            animation: animation.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_sticker<I, R>(
        &self,
        recipients: I,
        sticker: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Sticker {
            sticker: sticker.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_location<I, R>(
        &self,
        recipients: I,
        latitude: f64,
        longitude: f64,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Location {
            latitude,
            longitude,
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_poll<I, R>(
        &self,
        recipients: I,
        question: impl Into<String>,
        options: Vec<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Poll {
            question: question.into(),
            options,
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_quiz<I, R>(
        &self,
        recipients: I,
        question: impl Into<String>,
        options: Vec<String>,
        correct_option_id: u32,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Quiz {
            question: question.into(),
            options,
            correct_option_id,
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_game<I, R>(
        &self,
        recipients: I,
        game_short_name: impl Into<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Game {
            game_short_name: game_short_name.into(),
        };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_chat_action<I, R>(
        &self,
        recipients: I,
        action: ChatAction,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::ChatAction { action };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_dice<I, R>(
        &self,
        recipients: I,
        emoji: Option<String>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::Dice { emoji };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    pub async fn send_media_group<I, R>(
        &self,
        recipients: I,
        media: Vec<MediaGroupItem>,
        extra: Option<ExtraOptions>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<RecipientId>,
    {
        let operation = Operation::MediaGroup { media };
        self.dispatch(recipients, operation, extra.unwrap_or_default())
            .await
    }

    /// Percentage of the latest dispatch that reached a terminal state
    pub fn progress(&self) -> f64 {
        self.session.progress()
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Per-state counts, fetched concurrently
    pub async fn status(&self) -> Result<BroadcastStatus> {
        let store = &self.store;
        let (waiting_count, active_count, delayed_count, completed_count, failed_count) =
            tokio::try_join!(
                store.count_by_state(JobState::Waiting),
                store.count_by_state(JobState::Active),
                store.count_by_state(JobState::Delayed),
                store.count_by_state(JobState::Completed),
                store.count_by_state(JobState::Failed),
            )?;

        Ok(BroadcastStatus {
            waiting_count,
            active_count,
            delayed_count,
            completed_count,
            failed_count,
        })
    }

    /// Raw failed records, oldest first
    pub async fn failed_jobs(&self, limit: Option<usize>) -> Result<Vec<JobRecord>> {
        Ok(self.store.list_by_state(JobState::Failed, limit).await?)
    }

    /// Failed records run through the failure formatter
    pub async fn failed_formatted(&self, limit: Option<usize>) -> Result<Vec<FormattedFailedJob>> {
        Ok(self
            .failed_jobs(limit)
            .await?
            .iter()
            .map(format_failed_job)
            .collect())
    }

    /// Called once per job that completed
    pub fn on_processed<F>(&self, callback: F)
    where
        F: Fn(&JobRecord) + Send + Sync + 'static,
    {
        self.events.on_processed(callback);
    }

    /// Called once per job that failed for good, with the raw record
    pub fn on_failed<F>(&self, callback: F)
    where
        F: Fn(&JobRecord) + Send + Sync + 'static,
    {
        self.events.on_failed(callback);
    }

    /// Called when the queue runs out of claimable jobs
    pub fn on_drained<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_drained(callback);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.events.subscribe()
    }

    /// Stop the workers after their in-flight calls. Jobs stay in the store.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

async fn open_pg_store(config: &BroadcasterConfig) -> Result<PgJobStore> {
    let url = config.queue_options.database_url.clone().ok_or_else(|| {
        BroadcastError::configuration(
            "queue_options",
            "database_url is required for a durable queue",
        )
    })?;
    Ok(PgJobStore::connect(
        &url,
        config.queue_options.max_connections,
        &config.queue_name,
    )
    .await?)
}
