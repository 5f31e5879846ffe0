//! Application event hooks.
//!
//! A mediator lets the embedding application intercept connection lifecycle
//! points: connect, subscribe, publish, rpc and so on. Every hook has a
//! default implementation that allows the action with no side effects, so an
//! application only overrides what it cares about. The kernel stores the
//! mediator and invokes it at the corresponding lifecycle points; policy
//! lives entirely in the application.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use surge_proto::{Disconnect, Error, Publication};

use crate::client::ClientHandle;

/// A new connection was established.
pub struct ConnectEvent {
    pub client: Arc<dyn ClientHandle>,
}

/// Reply to a connect event.
#[derive(Default)]
pub struct ConnectReply {
    pub error: Option<Error>,
    pub disconnect: Option<Disconnect>,
}

/// A connection was closed.
pub struct DisconnectEvent {
    pub client: Arc<dyn ClientHandle>,
    pub disconnect: Disconnect,
}

/// A client asks to subscribe to a channel.
pub struct SubscribeEvent {
    pub client: Arc<dyn ClientHandle>,
    pub channel: String,
}

/// Reply to a subscribe event.
#[derive(Default)]
pub struct SubscribeReply {
    pub error: Option<Error>,
    pub disconnect: Option<Disconnect>,
}

/// A client unsubscribed from a channel.
pub struct UnsubscribeEvent {
    pub client: Arc<dyn ClientHandle>,
    pub channel: String,
}

/// Reply to an unsubscribe event.
#[derive(Default)]
pub struct UnsubscribeReply {
    pub error: Option<Error>,
    pub disconnect: Option<Disconnect>,
}

/// A client publishes into a channel.
pub struct PublishEvent {
    pub client: Arc<dyn ClientHandle>,
    pub channel: String,
    pub publication: Publication,
}

/// Reply to a publish event.
#[derive(Default)]
pub struct PublishReply {
    pub error: Option<Error>,
    pub disconnect: Option<Disconnect>,
}

/// A client requests channel presence.
pub struct PresenceEvent {
    pub client: Arc<dyn ClientHandle>,
}

/// Reply to a presence event.
#[derive(Default)]
pub struct PresenceReply {
    pub disconnect: Option<Disconnect>,
}

/// A client refreshes its connection credentials.
pub struct RefreshEvent {
    pub client: Arc<dyn ClientHandle>,
}

/// Reply to a refresh event.
#[derive(Default)]
pub struct RefreshReply {
    /// New expiration, unix seconds. Zero means no expiration.
    pub exp: i64,
    /// Updated opaque connection info.
    pub info: Option<Bytes>,
}

/// A client sent an rpc request.
pub struct RpcEvent {
    pub client: Arc<dyn ClientHandle>,
    pub data: Bytes,
}

/// Reply to an rpc event.
#[derive(Default)]
pub struct RpcReply {
    pub error: Option<Error>,
    pub disconnect: Option<Disconnect>,
    pub result: Option<Bytes>,
}

/// A client sent a fire-and-forget message.
pub struct MessageEvent {
    pub client: Arc<dyn ClientHandle>,
    pub data: Bytes,
}

/// Reply to a message event.
#[derive(Default)]
pub struct MessageReply {
    pub disconnect: Option<Disconnect>,
}

/// Application event hooks, every one optional.
#[async_trait]
pub trait Mediator: Send + Sync {
    async fn on_connect(&self, event: ConnectEvent) -> ConnectReply {
        let _ = event;
        ConnectReply::default()
    }

    async fn on_disconnect(&self, event: DisconnectEvent) {
        let _ = event;
    }

    async fn on_subscribe(&self, event: SubscribeEvent) -> SubscribeReply {
        let _ = event;
        SubscribeReply::default()
    }

    async fn on_unsubscribe(&self, event: UnsubscribeEvent) -> UnsubscribeReply {
        let _ = event;
        UnsubscribeReply::default()
    }

    async fn on_publish(&self, event: PublishEvent) -> PublishReply {
        let _ = event;
        PublishReply::default()
    }

    async fn on_presence(&self, event: PresenceEvent) -> PresenceReply {
        let _ = event;
        PresenceReply::default()
    }

    async fn on_refresh(&self, event: RefreshEvent) -> RefreshReply {
        let _ = event;
        RefreshReply::default()
    }

    async fn on_rpc(&self, event: RpcEvent) -> RpcReply {
        let _ = event;
        RpcReply::default()
    }

    async fn on_message(&self, event: MessageEvent) -> MessageReply {
        let _ = event;
        MessageReply::default()
    }
}
