//! # Operations
//!
//! The outbound action a broadcast performs for every recipient. Each variant
//! carries exactly the fields its API method needs; per-recipient options
//! that the API accepts but the engine does not interpret travel in
//! [`ExtraOptions`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::job::RecipientId;
use crate::error::{BroadcastError, Result};

/// Maximum message text length accepted by the Bot API
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Poll option bounds accepted by the Bot API
pub const MIN_POLL_OPTIONS: usize = 2;
pub const MAX_POLL_OPTIONS: usize = 10;

/// Media group size bounds accepted by the Bot API
pub const MIN_MEDIA_GROUP_SIZE: usize = 2;
pub const MAX_MEDIA_GROUP_SIZE: usize = 10;

/// Where a copied message originates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopySource {
    /// Copy from an explicit source chat
    Chat(RecipientId),
    /// Copy from the recipient's own chat. Must be chosen explicitly.
    Recipient,
}

/// Chat actions accepted by `sendChatAction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    RecordVideo,
    UploadVideo,
    RecordVoice,
    UploadVoice,
    UploadDocument,
    ChooseSticker,
    FindLocation,
    RecordVideoNote,
    UploadVideoNote,
}

/// Media types allowed inside a media group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaGroupKind {
    Photo,
    Video,
    Audio,
    Document,
}

/// One item of a media group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaGroupItem {
    #[serde(rename = "type")]
    pub kind: MediaGroupKind,
    /// File id or URL
    pub media: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl MediaGroupItem {
    pub fn new(kind: MediaGroupKind, media: impl Into<String>) -> Self {
        Self {
            kind,
            media: media.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// Extra API options merged into every call of a broadcast
/// (`parse_mode`, `reply_markup`, `disable_notification`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraOptions(Map<String, Value>);

impl ExtraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for ExtraOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The operation a broadcast performs, one variant per supported kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Text {
        text: String,
    },
    Copy {
        source: CopySource,
        message_id: i64,
    },
    Photo {
        photo: String,
    },
    Document {
        document: String,
    },
    Audio {
        audio: String,
    },
    Video {
        video: String,
    },
    Voice {
        voice: String,
    },
    VideoNote {
        video_note: String,
    },
    Animation {
        animation: String,
    },
    Sticker {
        sticker: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Poll {
        question: String,
        options: Vec<String>,
    },
    Quiz {
        question: String,
        options: Vec<String>,
        correct_option_id: u32,
    },
    Game {
        game_short_name: String,
    },
    ChatAction {
        action: ChatAction,
    },
    Dice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<String>,
    },
    MediaGroup {
        media: Vec<MediaGroupItem>,
    },
}

/// Discriminant of [`Operation`], used for persistence and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Text,
    Copy,
    Photo,
    Document,
    Audio,
    Video,
    Voice,
    VideoNote,
    Animation,
    Sticker,
    Location,
    Poll,
    Quiz,
    Game,
    ChatAction,
    Dice,
    MediaGroup,
}

impl OperationKind {
    pub const ALL: [OperationKind; 17] = [
        Self::Text,
        Self::Copy,
        Self::Photo,
        Self::Document,
        Self::Audio,
        Self::Video,
        Self::Voice,
        Self::VideoNote,
        Self::Animation,
        Self::Sticker,
        Self::Location,
        Self::Poll,
        Self::Quiz,
        Self::Game,
        Self::ChatAction,
        Self::Dice,
        Self::MediaGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Copy => "copy",
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::Animation => "animation",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Poll => "poll",
            Self::Quiz => "quiz",
            Self::Game => "game",
            Self::ChatAction => "chat_action",
            Self::Dice => "dice",
            Self::MediaGroup => "media_group",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = BroadcastError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BroadcastError::unsupported_operation(s))
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Text { .. } => OperationKind::Text,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Photo { .. } => OperationKind::Photo,
            Self::Document { .. } => OperationKind::Document,
            Self::Audio { .. } => OperationKind::Audio,
            Self::Video { .. } => OperationKind::Video,
            Self::Voice { .. } => OperationKind::Voice,
            Self::VideoNote { .. } => OperationKind::VideoNote,
            Self::Animation { .. } => OperationKind::Animation,
            Self::Sticker { .. } => OperationKind::Sticker,
            Self::Location { .. } => OperationKind::Location,
            Self::Poll { .. } => OperationKind::Poll,
            Self::Quiz { .. } => OperationKind::Quiz,
            Self::Game { .. } => OperationKind::Game,
            Self::ChatAction { .. } => OperationKind::ChatAction,
            Self::Dice { .. } => OperationKind::Dice,
            Self::MediaGroup { .. } => OperationKind::MediaGroup,
        }
    }

    /// Split into the persisted `(kind, payload)` pair
    pub fn to_parts(&self) -> Result<(OperationKind, Value)> {
        let mut tagged = serde_json::to_value(self)
            .map_err(|e| BroadcastError::invalid_payload(self.kind().as_str(), e.to_string()))?;
        let payload = tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok((self.kind(), payload))
    }

    /// Rebuild an operation from its persisted `(kind, payload)` pair.
    ///
    /// Unknown kinds fail with `UnsupportedOperation`; known kinds whose
    /// payload does not match fail with `InvalidPayload`.
    pub fn from_parts(kind: &str, payload: Value) -> Result<Self> {
        let kind = OperationKind::from_str(kind)?;
        let tagged = serde_json::json!({ "kind": kind.as_str(), "payload": payload });
        serde_json::from_value(tagged)
            .map_err(|e| BroadcastError::invalid_payload(kind.as_str(), e.to_string()))
    }

    /// Check that the operation carries everything its API method requires
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        let invalid = |message: &str| Err(BroadcastError::invalid_payload(kind.as_str(), message));

        match self {
            Self::Text { text } => {
                if text.trim().is_empty() {
                    return invalid("text must not be empty");
                }
                if text.chars().count() > MAX_TEXT_LENGTH {
                    return invalid("text exceeds 4096 characters");
                }
            }
            Self::Copy { source, message_id } => {
                if *message_id <= 0 {
                    return invalid("message_id must be positive");
                }
                if let CopySource::Chat(chat) = source {
                    if !chat.is_valid() {
                        return invalid("source chat id is not a valid identifier");
                    }
                }
            }
            Self::Photo { photo: media }
            | Self::Document { document: media }
            | Self::Audio { audio: media }
            | Self::Video { video: media }
            | Self::Voice { voice: media }
            | Self::VideoNote { video_note: media }
            | Self::Animation { animation: media }
            | Self::Sticker { sticker: media } => {
                if media.trim().is_empty() {
                    return invalid("media reference must not be empty");
                }
            }
            Self::Location {
                latitude,
                longitude,
            } => {
                if !(-90.0..=90.0).contains(latitude) {
                    return invalid("latitude must be within [-90, 90]");
                }
                if !(-180.0..=180.0).contains(longitude) {
                    return invalid("longitude must be within [-180, 180]");
                }
            }
            Self::Poll { question, options } => {
                validate_poll(question, options).or_else(|m| invalid(&m))?;
            }
            Self::Quiz {
                question,
                options,
                correct_option_id,
            } => {
                validate_poll(question, options).or_else(|m| invalid(&m))?;
                if *correct_option_id as usize >= options.len() {
                    return invalid("correct_option_id is out of range");
                }
            }
            Self::Game { game_short_name } => {
                if game_short_name.trim().is_empty() {
                    return invalid("game_short_name must not be empty");
                }
            }
            Self::ChatAction { .. } => {}
            Self::Dice { emoji } => {
                if matches!(emoji, Some(e) if e.trim().is_empty()) {
                    return invalid("emoji must not be blank");
                }
            }
            Self::MediaGroup { media } => {
                if !(MIN_MEDIA_GROUP_SIZE..=MAX_MEDIA_GROUP_SIZE).contains(&media.len()) {
                    return invalid("media group must contain 2 to 10 items");
                }
                if media.iter().any(|item| item.media.trim().is_empty()) {
                    return invalid("media reference must not be empty");
                }
            }
        }

        Ok(())
    }
}

fn validate_poll(question: &str, options: &[String]) -> std::result::Result<(), String> {
    if question.trim().is_empty() {
        return Err("question must not be empty".to_string());
    }
    if !(MIN_POLL_OPTIONS..=MAX_POLL_OPTIONS).contains(&options.len()) {
        return Err("poll must have 2 to 10 options".to_string());
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err("poll options must not be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_conversion() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!(matches!(
            "hologram".parse::<OperationKind>(),
            Err(BroadcastError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_parts_roundtrip_preserves_kind() {
        let op = Operation::Copy {
            source: CopySource::Chat(RecipientId::Id(-100123)),
            message_id: 42,
        };
        let (kind, payload) = op.to_parts().unwrap();
        assert_eq!(kind, OperationKind::Copy);
        assert_eq!(payload["message_id"], 42);

        let rebuilt = Operation::from_parts(kind.as_str(), payload).unwrap();
        assert_eq!(rebuilt, op);
    }

    #[test]
    fn test_from_parts_rejects_mismatched_payload() {
        let result = Operation::from_parts("text", serde_json::json!({ "photo": "abc" }));
        assert!(matches!(result, Err(BroadcastError::InvalidPayload { .. })));

        let result = Operation::from_parts("teleport", serde_json::json!({}));
        assert!(matches!(
            result,
            Err(BroadcastError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_validate_text() {
        assert!(Operation::Text {
            text: "hello".into()
        }
        .validate()
        .is_ok());
        assert!(Operation::Text { text: "  ".into() }.validate().is_err());
        assert!(Operation::Text {
            text: "x".repeat(MAX_TEXT_LENGTH + 1)
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_validate_quiz_correct_option() {
        let quiz = |correct| Operation::Quiz {
            question: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option_id: correct,
        };
        assert!(quiz(1).validate().is_ok());
        assert!(quiz(2).validate().is_err());
    }

    #[test]
    fn test_validate_location_bounds() {
        let ok = Operation::Location {
            latitude: 41.3,
            longitude: 69.2,
        };
        assert!(ok.validate().is_ok());
        let bad = Operation::Location {
            latitude: 91.0,
            longitude: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_media_group_size() {
        let single = Operation::MediaGroup {
            media: vec![MediaGroupItem::new(MediaGroupKind::Photo, "file-1")],
        };
        assert!(single.validate().is_err());

        let pair = Operation::MediaGroup {
            media: vec![
                MediaGroupItem::new(MediaGroupKind::Photo, "file-1"),
                MediaGroupItem::new(MediaGroupKind::Photo, "file-2").with_caption("two"),
            ],
        };
        assert!(pair.validate().is_ok());
    }

    #[test]
    fn test_copy_requires_positive_message_id() {
        let op = Operation::Copy {
            source: CopySource::Recipient,
            message_id: 0,
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_extra_options_serialize_transparently() {
        let extra = ExtraOptions::new()
            .with("parse_mode", "HTML")
            .with("disable_notification", true);
        let json = serde_json::to_value(&extra).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["disable_notification"], true);
    }
}
