//! Channel message types for the surge wire protocol.
//!
//! Everything that flows through an engine channel is one of these types,
//! identified on the wire by a leading type tag.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MessageType {
    Publication = 0x01,
    Join = 0x02,
    Leave = 0x03,
}

impl From<MessageType> for u8 {
    fn from(mt: MessageType) -> u8 {
        mt as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, &'static str> {
        match value {
            0x01 => Ok(MessageType::Publication),
            0x02 => Ok(MessageType::Join),
            0x03 => Ok(MessageType::Leave),
            _ => Err("Invalid message type"),
        }
    }
}

/// Information about the connection that produced a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// User id the connection authenticated as.
    pub user: String,
    /// Connection id.
    pub client: String,
    /// Opaque per-connection info attached at connect time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_info: Option<Bytes>,
    /// Opaque per-channel info attached at subscribe time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chan_info: Option<Bytes>,
}

impl ClientInfo {
    /// Create client info for a user/connection pair.
    #[must_use]
    pub fn new(user: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            client: client.into(),
            conn_info: None,
            chan_info: None,
        }
    }
}

/// A single delivered message within a channel.
///
/// A publication entering the pipeline with an empty `uid` gets a unique id
/// stamped before it reaches the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Globally-unique publication id.
    pub uid: String,
    /// Message payload.
    pub data: Bytes,
    /// Information about the publishing connection, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ClientInfo>,
}

impl Publication {
    /// Create a publication with an empty uid.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            uid: String::new(),
            data: data.into(),
            info: None,
        }
    }

    /// Attach publisher info.
    #[must_use]
    pub fn with_info(mut self, info: ClientInfo) -> Self {
        self.info = Some(info);
        self
    }
}

/// Presence event broadcast when a client subscribes to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub info: ClientInfo,
}

/// Presence event broadcast when a client unsubscribes from a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leave {
    pub info: ClientInfo,
}

/// Advice sent to a client when its connection is closed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    /// Human-readable close reason.
    pub reason: String,
    /// Whether the client should attempt to reconnect.
    pub reconnect: bool,
}

/// A protocol-level error carried in replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: u16,
    pub message: String,
}

/// A decoded channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Publication(Publication),
    Join(Join),
    Leave(Leave),
}

impl ChannelMessage {
    /// Get the wire type tag for this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            ChannelMessage::Publication(_) => MessageType::Publication,
            ChannelMessage::Join(_) => MessageType::Join,
            ChannelMessage::Leave(_) => MessageType::Leave,
        }
    }

    /// Metric label for this message type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Publication(_) => "publication",
            ChannelMessage::Join(_) => "join",
            ChannelMessage::Leave(_) => "leave",
        }
    }
}
