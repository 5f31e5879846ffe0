//! # surge-proto
//!
//! Wire types and codecs for the surge realtime kernel.
//!
//! This crate defines everything that crosses an engine boundary:
//!
//! - **Channel messages** - publications, join/leave presence events
//! - **Control commands** - peer announcements, forced unsubscribe/disconnect
//! - **Codecs** - length-prefixed, type-tagged MessagePack framing behind
//!   injectable [`MessageCodec`] / [`ControlCodec`] traits
//! - **Ids** - node uuids and short publication uids
//!
//! ## Example
//!
//! ```rust
//! use surge_proto::{codec::MsgpackMessageCodec, ChannelMessage, MessageCodec, Publication};
//!
//! let codec = MsgpackMessageCodec;
//! let publication = Publication::new(b"Hello, world!".to_vec());
//!
//! let encoded = codec.encode_publication(&publication).unwrap();
//! let decoded = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, ChannelMessage::Publication(publication));
//! ```

pub mod codec;
pub mod control;
pub mod id;
pub mod messages;

pub use codec::{CodecError, ControlCodec, MessageCodec, MsgpackControlCodec, MsgpackMessageCodec};
pub use control::{Command, MethodType, PeerInfo};
pub use messages::{
    ChannelMessage, ClientInfo, Disconnect, Error, Join, Leave, MessageType, Publication,
};
