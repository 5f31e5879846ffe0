//! Control-plane wire types.
//!
//! Control commands are exchanged between peer nodes over a dedicated engine
//! channel: periodic peer announcements, forced unsubscribes and forced
//! disconnects.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Control command method identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MethodType {
    /// Peer announcement carrying a [`PeerInfo`] snapshot.
    Node = 0x00,
    /// Unsubscribe a user from a channel on every node.
    Unsubscribe = 0x01,
    /// Close all connections of a user on every node.
    Disconnect = 0x02,
}

impl From<MethodType> for u8 {
    fn from(mt: MethodType) -> u8 {
        mt as u8
    }
}

impl TryFrom<u8> for MethodType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, &'static str> {
        match value {
            0x00 => Ok(MethodType::Node),
            0x01 => Ok(MethodType::Unsubscribe),
            0x02 => Ok(MethodType::Disconnect),
            _ => Err("Invalid control method"),
        }
    }
}

impl MethodType {
    /// Metric label for this method.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            MethodType::Node => "node",
            MethodType::Unsubscribe => "unsubscribe",
            MethodType::Disconnect => "disconnect",
        }
    }
}

/// An inter-node control command.
///
/// `uid` is the sender's node uid; a receiver whose own uid matches treats
/// the command as a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub uid: String,
    pub method: MethodType,
    /// Method-specific params, encoded separately.
    pub params: Bytes,
}

/// A peer node's self-reported state, carried by [`MethodType::Node`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub uid: String,
    pub name: String,
    pub version: String,
    pub num_clients: u32,
    pub num_users: u32,
    pub num_channels: u32,
    /// Seconds since the peer started.
    pub uptime: u32,
}

/// Params of [`MethodType::Unsubscribe`].
///
/// An empty channel means every channel the user is subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub user: String,
    pub channel: String,
}

/// Params of [`MethodType::Disconnect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_type_conversion() {
        assert_eq!(MethodType::try_from(0x00), Ok(MethodType::Node));
        assert_eq!(MethodType::try_from(0x01), Ok(MethodType::Unsubscribe));
        assert_eq!(MethodType::try_from(0x02), Ok(MethodType::Disconnect));
        assert!(MethodType::try_from(0x03).is_err());
    }

    #[test]
    fn test_method_kind_labels() {
        assert_eq!(MethodType::Node.kind(), "node");
        assert_eq!(MethodType::Unsubscribe.kind(), "unsubscribe");
        assert_eq!(MethodType::Disconnect.kind(), "disconnect");
    }
}
