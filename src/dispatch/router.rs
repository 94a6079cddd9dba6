//! # Dispatch Router
//!
//! Maps a job's operation onto exactly one messaging API call.
//!
//! The kind → method table ([`method_for`]) and the per-kind argument shaping
//! in [`kind_arguments`] are both exhaustive matches over the operation sum
//! type, so adding a kind is a compile error until both are filled in.
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ JobData      │────▶│ DispatchRouter │────▶│ Deliverable  │
//! │ kind+payload │     │ route + invoke │     │ (one call)   │
//! └──────────────┘     └────────────────┘     └──────────────┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::BroadcastError;
use crate::messaging::{ApiCall, ApiError, ApiResponse, Deliverable};
use crate::models::{CopySource, ExtraOptions, JobData, Operation, OperationKind, RecipientId};

/// API method name for a kind
pub fn method_for(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Text => "sendMessage",
        OperationKind::Copy => "copyMessage",
        OperationKind::Photo => "sendPhoto",
        OperationKind::Document => "sendDocument",
        OperationKind::Audio => "sendAudio",
        OperationKind::Video => "sendVideo",
        OperationKind::Voice => "sendVoice",
        OperationKind::VideoNote => "sendVideoNote",
        OperationKind::Animation => "sendAnimation",
        OperationKind::Sticker => "sendSticker",
        OperationKind::Location => "sendLocation",
        OperationKind::Poll | OperationKind::Quiz => "sendPoll",
        OperationKind::Game => "sendGame",
        OperationKind::ChatAction => "sendChatAction",
        OperationKind::Dice => "sendDice",
        OperationKind::MediaGroup => "sendMediaGroup",
    }
}

/// Kind-specific arguments in their fixed order, excluding `chat_id`
fn kind_arguments(recipient: &RecipientId, operation: &Operation) -> Vec<(&'static str, Value)> {
    match operation {
        Operation::Text { text } => vec![("text", text.clone().into())],
        Operation::Copy { source, message_id } => {
            let from_chat = match source {
                CopySource::Chat(chat) => chat.to_value(),
                CopySource::Recipient => recipient.to_value(),
            };
            vec![
                ("from_chat_id", from_chat),
                ("message_id", (*message_id).into()),
            ]
        }
        Operation::Photo { photo } => vec![("photo", photo.clone().into())],
        Operation::Document { document } => vec![("document", document.clone().into())],
        Operation::Audio { audio } => vec![("audio", audio.clone().into())],
        Operation::Video { video } => vec![("video", video.clone().into())],
        Operation::Voice { voice } => vec![("voice", voice.clone().into())],
        Operation::VideoNote { video_note } => vec![("video_note", video_note.clone().into())],
        Operation::Animation { animation } => vec![("animation", animation.clone().into())],
        Operation::Sticker { sticker } => vec![("sticker", sticker.clone().into())],
        Operation::Location {
            latitude,
            longitude,
        } => vec![
            ("latitude", (*latitude).into()),
            ("longitude", (*longitude).into()),
        ],
        Operation::Poll { question, options } => vec![
            ("question", question.clone().into()),
            ("options", options.clone().into()),
        ],
        Operation::Quiz {
            question,
            options,
            correct_option_id,
        } => vec![
            ("question", question.clone().into()),
            ("options", options.clone().into()),
            ("type", "quiz".into()),
            ("correct_option_id", (*correct_option_id).into()),
        ],
        Operation::Game { game_short_name } => {
            vec![("game_short_name", game_short_name.clone().into())]
        }
        Operation::ChatAction { action } => vec![(
            "action",
            serde_json::to_value(action).unwrap_or(Value::Null),
        )],
        Operation::Dice { emoji } => match emoji {
            Some(emoji) => vec![("emoji", emoji.clone().into())],
            None => Vec::new(),
        },
        Operation::MediaGroup { media } => vec![(
            "media",
            serde_json::to_value(media).unwrap_or(Value::Array(Vec::new())),
        )],
    }
}

/// Why a job could not be delivered by the router
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The job never reached the network: unknown kind or malformed payload
    #[error(transparent)]
    Unroutable(#[from] BroadcastError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DispatchError {
    pub fn is_unroutable(&self) -> bool {
        matches!(self, Self::Unroutable(_))
    }
}

/// Routes jobs to the messaging client. Performs no retries.
pub struct DispatchRouter<D: Deliverable> {
    client: Arc<D>,
}

impl<D: Deliverable> Clone for DispatchRouter<D> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<D: Deliverable> std::fmt::Debug for DispatchRouter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("client", &self.client.client_name())
            .finish()
    }
}

impl<D: Deliverable> DispatchRouter<D> {
    pub fn new(client: Arc<D>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<D> {
        &self.client
    }

    /// Shape the API call for one recipient.
    ///
    /// Arguments are `chat_id`, then the kind's fields, then extras. An extra
    /// option never overrides an argument the router already set.
    pub fn route(
        &self,
        recipient: &RecipientId,
        operation: &Operation,
        extra: &ExtraOptions,
    ) -> Result<ApiCall, BroadcastError> {
        if !recipient.is_valid() {
            return Err(BroadcastError::invalid_recipients(format!(
                "'{recipient}' is not a valid recipient id"
            )));
        }
        operation.validate()?;

        let mut call =
            ApiCall::new(method_for(operation.kind())).arg("chat_id", recipient.to_value());
        for (name, value) in kind_arguments(recipient, operation) {
            call = call.arg(name, value);
        }
        for (name, value) in extra.iter() {
            if call.get(name).is_none() {
                call = call.arg(name.clone(), value.clone());
            }
        }
        Ok(call)
    }

    /// Decode a persisted job and perform its single API call
    pub async fn invoke(&self, job: &JobData) -> Result<ApiResponse, DispatchError> {
        let operation = job.operation()?;
        let call = self.route(&job.recipient_id, &operation, &job.extra)?;

        debug!(
            method = call.method,
            recipient = %job.recipient_id,
            client = self.client.client_name(),
            "Dispatching API call"
        );

        Ok(self.client.call_api(&call).await?)
    }
}
