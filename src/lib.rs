#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Broadcaster Core
//!
//! Durable fan-out of one messaging operation to many recipients.
//!
//! ## Overview
//!
//! A caller hands the engine a list of recipients and one operation (a text,
//! a photo, a poll, a copy of an existing message...). The engine turns every
//! recipient into its own job record in a durable store, and a bounded pool
//! of workers drains that store by calling the messaging API once per job.
//! Transient failures are retried with backoff; permanent ones are recorded
//! and can be inspected later in a normalized shape.
//!
//! ## Architecture
//!
//! ```text
//! Broadcaster::send_* ──► JobStore (waiting) ──► WorkerPool ──► DispatchRouter ──► Deliverable
//!         │                     ▲                    │
//!         └── BroadcastSession  └── retry/complete ──┴──► EventHub (processed/failed/drained)
//! ```
//!
//! ## Module Organization
//!
//! - [`broadcaster`] - Public engine, session progress and lifecycle controls
//! - [`dispatch`] - Operation kind to API method routing
//! - [`store`] - Durable job store contract with in-memory and PostgreSQL providers
//! - [`state_machine`] - Job states and guarded transitions
//! - [`worker`] - Worker pool, retry policy and rate limiting
//! - [`events`] - Processed, failed and drained notifications
//! - [`formatter`] - Normalized view of failed jobs
//! - [`messaging`] - Messaging API capability and the Telegram Bot API client
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broadcaster_core::{Broadcaster, ConfigManager, TelegramBotApi};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?.config().clone();
//! let api = TelegramBotApi::from_token(std::env::var("BOT_TOKEN")?)?;
//! let broadcaster = Broadcaster::connect(api, config).await?;
//!
//! broadcaster
//!     .send_text(vec![155054210_i64], "Hello from the broadcaster", None)
//!     .await?;
//! println!("{:?}", broadcaster.status().await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests live next to the code they cover. Integration tests under
//! `tests/` drive the engine end to end against [`InMemoryJobStore`] and a
//! scripted [`Deliverable`]; no network or database is needed.

pub mod broadcaster;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod formatter;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use broadcaster::{BroadcastStatus, Broadcaster, CleanupReport, SessionSnapshot};
pub use config::{BroadcasterConfig, ConfigManager, ConfigurationError};
pub use dispatch::{DispatchError, DispatchRouter};
pub use error::{BroadcastError, Result};
pub use events::{BroadcastEvent, EventHub, PublishedEvent};
pub use formatter::{format_failed_job, FailedReason, FormattedFailedJob};
pub use messaging::{
    ApiCall, ApiError, ApiErrorKind, ApiResponse, Deliverable, TelegramApiConfig, TelegramBotApi,
};
pub use models::{
    ChatAction, CopySource, ExtraOptions, JobData, JobId, JobOptions, JobRecord, MediaGroupItem,
    MediaGroupKind, Operation, OperationKind, RecipientId,
};
pub use state_machine::JobState;
pub use store::{InMemoryJobStore, JobStore, PgJobStore, StoreError};
