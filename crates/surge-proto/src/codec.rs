//! Encoding and decoding of channel messages and control commands.
//!
//! Wire format is MessagePack with length-prefixed framing. Channel messages
//! carry a leading type tag after the length prefix so a receiver can
//! dispatch without decoding the body; control commands are a single framed
//! [`Command`] whose `params` field holds the method-specific payload.
//!
//! The kernel consumes codecs through the [`MessageCodec`] and
//! [`ControlCodec`] traits so an embedding application can swap the wire
//! encoding; the MessagePack implementations are the defaults.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::control::{Command, Disconnect, PeerInfo, Unsubscribe};
use crate::messages::{ChannelMessage, Join, Leave, MessageType, Publication};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(&'static str),
}

/// Encoder/decoder for messages flowing through engine data channels.
pub trait MessageCodec: Send + Sync {
    /// Encode a publication into a framed, type-tagged message body.
    fn encode_publication(&self, publication: &Publication) -> Result<Bytes, CodecError>;

    /// Encode a join event.
    fn encode_join(&self, join: &Join) -> Result<Bytes, CodecError>;

    /// Encode a leave event.
    fn encode_leave(&self, leave: &Leave) -> Result<Bytes, CodecError>;

    /// Decode a framed message body into a typed channel message.
    fn decode(&self, data: &[u8]) -> Result<ChannelMessage, CodecError>;
}

/// Encoder/decoder for control-plane commands and their params.
pub trait ControlCodec: Send + Sync {
    /// Encode a full control command.
    fn encode_command(&self, command: &Command) -> Result<Bytes, CodecError>;

    /// Decode a full control command.
    fn decode_command(&self, data: &[u8]) -> Result<Command, CodecError>;

    /// Encode peer-announcement params.
    fn encode_peer(&self, peer: &PeerInfo) -> Result<Bytes, CodecError>;

    /// Decode peer-announcement params.
    fn decode_peer(&self, data: &[u8]) -> Result<PeerInfo, CodecError>;

    /// Encode unsubscribe params.
    fn encode_unsubscribe(&self, unsubscribe: &Unsubscribe) -> Result<Bytes, CodecError>;

    /// Decode unsubscribe params.
    fn decode_unsubscribe(&self, data: &[u8]) -> Result<Unsubscribe, CodecError>;

    /// Encode disconnect params.
    fn encode_disconnect(&self, disconnect: &Disconnect) -> Result<Bytes, CodecError>;

    /// Decode disconnect params.
    fn decode_disconnect(&self, data: &[u8]) -> Result<Disconnect, CodecError>;
}

/// Write a length prefix followed by the payload.
fn frame(payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Strip and validate the length prefix, returning the payload slice.
fn unframe(data: &[u8]) -> Result<&[u8], CodecError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(CodecError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(length));
    }
    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(CodecError::Incomplete(total - data.len()));
    }
    Ok(&data[LENGTH_PREFIX_SIZE..total])
}

fn encode_tagged<T: serde::Serialize>(tag: MessageType, body: &T) -> Result<Bytes, CodecError> {
    let payload = rmp_serde::to_vec_named(body)?;
    let mut tagged = Vec::with_capacity(1 + payload.len());
    tagged.push(u8::from(tag));
    tagged.extend_from_slice(&payload);
    frame(&tagged)
}

/// MessagePack channel-message codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackMessageCodec;

impl MessageCodec for MsgpackMessageCodec {
    fn encode_publication(&self, publication: &Publication) -> Result<Bytes, CodecError> {
        encode_tagged(MessageType::Publication, publication)
    }

    fn encode_join(&self, join: &Join) -> Result<Bytes, CodecError> {
        encode_tagged(MessageType::Join, join)
    }

    fn encode_leave(&self, leave: &Leave) -> Result<Bytes, CodecError> {
        encode_tagged(MessageType::Leave, leave)
    }

    fn decode(&self, data: &[u8]) -> Result<ChannelMessage, CodecError> {
        let payload = unframe(data)?;
        let (&tag, body) = payload
            .split_first()
            .ok_or(CodecError::Invalid("empty message body"))?;
        let message_type =
            MessageType::try_from(tag).map_err(|_| CodecError::Invalid("unknown message type"))?;
        match message_type {
            MessageType::Publication => {
                Ok(ChannelMessage::Publication(rmp_serde::from_slice(body)?))
            }
            MessageType::Join => Ok(ChannelMessage::Join(rmp_serde::from_slice(body)?)),
            MessageType::Leave => Ok(ChannelMessage::Leave(rmp_serde::from_slice(body)?)),
        }
    }
}

/// MessagePack control-command codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackControlCodec;

impl ControlCodec for MsgpackControlCodec {
    fn encode_command(&self, command: &Command) -> Result<Bytes, CodecError> {
        frame(&rmp_serde::to_vec_named(command)?)
    }

    fn decode_command(&self, data: &[u8]) -> Result<Command, CodecError> {
        Ok(rmp_serde::from_slice(unframe(data)?)?)
    }

    fn encode_peer(&self, peer: &PeerInfo) -> Result<Bytes, CodecError> {
        Ok(rmp_serde::to_vec_named(peer)?.into())
    }

    fn decode_peer(&self, data: &[u8]) -> Result<PeerInfo, CodecError> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn encode_unsubscribe(&self, unsubscribe: &Unsubscribe) -> Result<Bytes, CodecError> {
        Ok(rmp_serde::to_vec_named(unsubscribe)?.into())
    }

    fn decode_unsubscribe(&self, data: &[u8]) -> Result<Unsubscribe, CodecError> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn encode_disconnect(&self, disconnect: &Disconnect) -> Result<Bytes, CodecError> {
        Ok(rmp_serde::to_vec_named(disconnect)?.into())
    }

    fn decode_disconnect(&self, data: &[u8]) -> Result<Disconnect, CodecError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MethodType;
    use crate::messages::ClientInfo;

    #[test]
    fn test_publication_roundtrip() {
        let codec = MsgpackMessageCodec;
        let publication = Publication {
            uid: "p1".into(),
            data: Bytes::from_static(b"hi"),
            info: Some(ClientInfo::new("alice", "c1")),
        };

        let encoded = codec.encode_publication(&publication).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, ChannelMessage::Publication(publication));
    }

    #[test]
    fn test_join_leave_roundtrip() {
        let codec = MsgpackMessageCodec;
        let info = ClientInfo::new("bob", "c2");

        let join = codec.encode_join(&Join { info: info.clone() }).unwrap();
        assert!(matches!(
            codec.decode(&join).unwrap(),
            ChannelMessage::Join(_)
        ));

        let leave = codec.encode_leave(&Leave { info }).unwrap();
        assert!(matches!(
            codec.decode(&leave).unwrap(),
            ChannelMessage::Leave(_)
        ));
    }

    #[test]
    fn test_decode_incomplete() {
        let codec = MsgpackMessageCodec;
        let encoded = codec
            .encode_publication(&Publication::new(b"hello".to_vec()))
            .unwrap();

        match codec.decode(&encoded[..5]) {
            Err(CodecError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let codec = MsgpackMessageCodec;
        let framed = frame(&[0xFF, 0x00]).unwrap();
        assert!(matches!(
            codec.decode(&framed),
            Err(CodecError::Invalid(_))
        ));
    }

    #[test]
    fn test_command_roundtrip() {
        let codec = MsgpackControlCodec;
        let params = codec
            .encode_unsubscribe(&Unsubscribe {
                user: "u1".into(),
                channel: "chat:lobby".into(),
            })
            .unwrap();
        let command = Command {
            uid: "node-1".into(),
            method: MethodType::Unsubscribe,
            params,
        };

        let encoded = codec.encode_command(&command).unwrap();
        let decoded = codec.decode_command(&encoded).unwrap();
        assert_eq!(decoded, command);

        let unsubscribe = codec.decode_unsubscribe(&decoded.params).unwrap();
        assert_eq!(unsubscribe.user, "u1");
        assert_eq!(unsubscribe.channel, "chat:lobby");
    }

    #[test]
    fn test_peer_params_roundtrip() {
        let codec = MsgpackControlCodec;
        let peer = PeerInfo {
            uid: "node-2".into(),
            name: "east-1".into(),
            version: "0.1.0".into(),
            num_clients: 3,
            num_users: 2,
            num_channels: 1,
            uptime: 60,
        };

        let params = codec.encode_peer(&peer).unwrap();
        assert_eq!(codec.decode_peer(&params).unwrap(), peer);
    }

    #[test]
    fn test_frame_too_large() {
        let codec = MsgpackMessageCodec;
        let publication = Publication::new(vec![0u8; MAX_FRAME_SIZE + 1]);
        match codec.encode_publication(&publication) {
            Err(CodecError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
