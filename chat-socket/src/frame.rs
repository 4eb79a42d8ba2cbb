//! Wire frames exchanged over the multiplexed connection.
//!
//! A [`Frame`] is the single typed event unit for chat messages, presence
//! changes, typing signals and read receipts. Frames travel as JSON with
//! camelCase keys; the `type` tag uses SCREAMING_SNAKE_CASE
//! (`CHAT`, `JOIN`, `LEAVE`, `TYPING`, `STOP_TYPING`, `READ`).

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use chat_core::constants::destinations;
use chat_core::error::{ChatError, ChatResult};

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// A chat message with content or media.
    Chat,
    /// A user joined (came online / entered a conversation).
    Join,
    /// A user left (went offline / left a conversation).
    Leave,
    /// The sender started typing.
    Typing,
    /// The sender stopped typing.
    StopTyping,
    /// Read receipt.
    Read,
}

impl FrameKind {
    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Typing => "TYPING",
            Self::StopTyping => "STOP_TYPING",
            Self::Read => "READ",
        }
    }

    /// Whether this kind is a typing signal.
    pub fn is_typing_signal(&self) -> bool {
        matches!(self, Self::Typing | Self::StopTyping)
    }

    /// Whether this kind is a presence change.
    pub fn is_presence(&self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }

    /// Broker destination outbound frames of this kind are published to.
    pub fn destination(&self) -> &'static str {
        match self {
            Self::Chat | Self::Join | Self::Leave => destinations::SEND_MESSAGE,
            Self::Typing | Self::StopTyping => destinations::SEND_TYPING,
            Self::Read => destinations::SEND_READ,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Addressing mode of a frame: exactly one of receiver or conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Direct message to a single user.
    Direct(String),
    /// Group message to a conversation.
    Group(String),
}

impl Address {
    /// Direct address for a user id.
    pub fn direct(receiver_id: impl Into<String>) -> Self {
        Self::Direct(receiver_id.into())
    }

    /// Group address for a conversation id.
    pub fn group(conversation_id: impl Into<String>) -> Self {
        Self::Group(conversation_id.into())
    }
}

/// A single typed event unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// Message identifier (chat messages and read receipts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Sending user.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sender_id: String,

    /// Display name of the sending user.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub sender_name: String,

    /// Receiving user for direct addressing, empty for group frames.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub receiver_id: String,

    /// Conversation for group addressing, empty for direct frames.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub conversation_id: String,

    /// Text content (chat only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Media attachment URL (chat only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    /// When the frame was created. Accepts RFC 3339 or epoch milliseconds.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Delivery status.
    #[serde(default)]
    pub status: DeliveryStatus,
}

impl Frame {
    /// Create an unsent frame of `kind` for `address`, sender left empty.
    pub fn new(kind: FrameKind, address: &Address) -> Self {
        let (receiver_id, conversation_id) = match address {
            Address::Direct(id) => (id.clone(), String::new()),
            Address::Group(id) => (String::new(), id.clone()),
        };
        Self {
            kind,
            message_id: None,
            sender_id: String::new(),
            sender_name: String::new(),
            receiver_id,
            conversation_id,
            content: None,
            media_url: None,
            timestamp: Utc::now(),
            status: DeliveryStatus::Sent,
        }
    }

    /// A chat message with a fresh message id.
    pub fn chat(address: &Address, content: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameKind::Chat, address);
        frame.message_id = Some(uuid::Uuid::new_v4().to_string());
        frame.content = Some(content.into());
        frame
    }

    /// A typing-started signal.
    pub fn typing(address: &Address) -> Self {
        Self::new(FrameKind::Typing, address)
    }

    /// A typing-stopped signal.
    pub fn stop_typing(address: &Address) -> Self {
        Self::new(FrameKind::StopTyping, address)
    }

    /// A read receipt for `message_id`.
    pub fn read_receipt(address: &Address, message_id: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameKind::Read, address);
        frame.message_id = Some(message_id.into());
        frame.status = DeliveryStatus::Read;
        frame
    }

    /// Attach a media URL.
    pub fn with_media(mut self, media_url: impl Into<String>) -> Self {
        self.media_url = Some(media_url.into());
        self
    }

    /// Set the sender.
    pub fn with_sender(mut self, sender_id: impl Into<String>, sender_name: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self.sender_name = sender_name.into();
        self
    }

    /// The addressing mode, if one is set.
    pub fn address(&self) -> Option<Address> {
        match (self.receiver_id.is_empty(), self.conversation_id.is_empty()) {
            (false, true) => Some(Address::Direct(self.receiver_id.clone())),
            (true, false) => Some(Address::Group(self.conversation_id.clone())),
            _ => None,
        }
    }

    /// Whether this frame is group-addressed.
    pub fn is_group(&self) -> bool {
        !self.conversation_id.is_empty()
    }

    /// `Some(true)` for typing, `Some(false)` for stop-typing, `None` otherwise.
    pub fn is_typing(&self) -> Option<bool> {
        match self.kind {
            FrameKind::Typing => Some(true),
            FrameKind::StopTyping => Some(false),
            _ => None,
        }
    }

    /// Check the addressing and payload rules.
    pub fn validate(&self) -> ChatResult<()> {
        if !self.receiver_id.is_empty() && !self.conversation_id.is_empty() {
            return Err(ChatError::InvalidFrame(
                "receiverId and conversationId are mutually exclusive".into(),
            ));
        }

        if self.kind == FrameKind::Chat {
            if self.receiver_id.is_empty() && self.conversation_id.is_empty() {
                return Err(ChatError::InvalidFrame(
                    "chat frame needs a receiverId or a conversationId".into(),
                ));
            }
            let has_content = self.content.as_deref().is_some_and(|c| !c.is_empty());
            let has_media = self.media_url.as_deref().is_some_and(|m| !m.is_empty());
            if !has_content && !has_media {
                return Err(ChatError::InvalidFrame("chat frame without content or media".into()));
            }
        }

        Ok(())
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate an inbound JSON payload.
    ///
    /// Inbound frames must name their sender in addition to the addressing
    /// rules checked by [`Frame::validate`].
    pub fn decode(raw: &str) -> ChatResult<Self> {
        let frame: Frame = serde_json::from_str(raw)
            .map_err(|e| ChatError::InvalidFrame(format!("undecodable payload: {e}")))?;
        if frame.sender_id.is_empty() {
            return Err(ChatError::InvalidFrame("missing senderId".into()));
        }
        frame.validate()?;
        Ok(frame)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        RawTimestamp::Text(ts) => Ok(ts),
    }
}
