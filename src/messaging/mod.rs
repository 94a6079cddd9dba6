//! # Messaging
//!
//! The messaging API capability consumed by the dispatch router, plus the
//! Telegram Bot API adapter.

pub mod client;
pub mod telegram;

pub use client::{ApiCall, ApiError, ApiErrorKind, ApiResponse, Deliverable};
pub use telegram::{TelegramApiConfig, TelegramBotApi};
