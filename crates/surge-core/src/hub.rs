//! Connection and subscription registry.
//!
//! The hub tracks every client connected to this node and every channel
//! subscription, and is the fan-out primitive for delivering channel
//! messages to local subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use surge_proto::{Join, Leave, MessageCodec, Publication};

use crate::client::ClientHandle;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// A client with the same id is already registered.
    #[error("client already registered: {0}")]
    DuplicateClient(String),

    /// The client is not registered with this hub.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// Message could not be encoded for fan-out.
    #[error("Codec error: {0}")]
    Codec(#[from] surge_proto::CodecError),
}

/// All four indexes mutate together under the hub's single writer lock.
#[derive(Default)]
struct HubState {
    /// Connection id -> client handle.
    clients: HashMap<String, Arc<dyn ClientHandle>>,
    /// User id -> connection ids.
    users: HashMap<String, HashSet<String>>,
    /// Channel -> subscribed connection ids.
    channels: HashMap<String, HashSet<String>>,
    /// Connection id -> subscribed channels, kept for O(1) teardown.
    client_channels: HashMap<String, HashSet<String>>,
}

/// Remove one subscription edge from both directions.
///
/// Returns `true` iff the channel's subscriber set existed and became empty.
fn drop_sub(state: &mut HubState, channel: &str, client_id: &str) -> bool {
    if let Some(channels) = state.client_channels.get_mut(client_id) {
        channels.remove(channel);
        if channels.is_empty() {
            state.client_channels.remove(client_id);
        }
    }
    match state.channels.get_mut(channel) {
        Some(subscribers) => {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                state.channels.remove(channel);
                true
            } else {
                false
            }
        }
        None => false,
    }
}

/// Local connection and subscription registry.
///
/// Fan-out collects target handles under the read lock and delivers outside
/// it, so a slow subscriber cannot stall unrelated channels.
pub struct Hub {
    state: RwLock<HubState>,
    codec: Arc<dyn MessageCodec>,
}

impl Hub {
    /// Create an empty hub using the given codec for fan-out encoding.
    #[must_use]
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            codec,
        }
    }

    /// Register a connected client.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateClient` if a client with the same id is present.
    pub fn add(&self, client: Arc<dyn ClientHandle>) -> Result<(), HubError> {
        let mut state = self.state.write();
        let id = client.id().to_string();
        if state.clients.contains_key(&id) {
            return Err(HubError::DuplicateClient(id));
        }
        state
            .users
            .entry(client.user_id().to_string())
            .or_default()
            .insert(id.clone());
        debug!(client = %id, user = %client.user_id(), "client registered");
        state.clients.insert(id, client);
        Ok(())
    }

    /// Remove a client from every index. Idempotent.
    ///
    /// Returns the channels whose subscriber set became empty so the caller
    /// can release the engine subscriptions.
    pub fn remove(&self, client_id: &str) -> Vec<String> {
        let mut state = self.state.write();
        let Some(client) = state.clients.remove(client_id) else {
            return Vec::new();
        };

        let user = client.user_id().to_string();
        if let Some(ids) = state.users.get_mut(&user) {
            ids.remove(client_id);
            if ids.is_empty() {
                state.users.remove(&user);
            }
        }

        let channels: Vec<String> = state
            .client_channels
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut emptied = Vec::new();
        for channel in channels {
            if drop_sub(&mut state, &channel, client_id) {
                emptied.push(channel);
            }
        }
        debug!(client = %client_id, "client removed");
        emptied
    }

    /// Register a channel subscription.
    ///
    /// Returns `true` iff this is the first subscriber on the channel in this
    /// hub, in which case the caller must subscribe the engine.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if the client was never added.
    pub fn add_sub(&self, channel: &str, client: &dyn ClientHandle) -> Result<bool, HubError> {
        let mut state = self.state.write();
        let id = client.id();
        if !state.clients.contains_key(id) {
            return Err(HubError::UnknownClient(id.to_string()));
        }
        state
            .client_channels
            .entry(id.to_string())
            .or_default()
            .insert(channel.to_string());
        let subscribers = state.channels.entry(channel.to_string()).or_default();
        let first = subscribers.is_empty();
        subscribers.insert(id.to_string());
        debug!(channel = %channel, client = %id, first = first, "subscription added");
        Ok(first)
    }

    /// Remove a channel subscription.
    ///
    /// Returns `true` iff the channel has no subscribers left, in which case
    /// the caller must unsubscribe the engine.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if the client was never added.
    pub fn remove_sub(&self, channel: &str, client: &dyn ClientHandle) -> Result<bool, HubError> {
        let mut state = self.state.write();
        let id = client.id();
        if !state.clients.contains_key(id) {
            return Err(HubError::UnknownClient(id.to_string()));
        }
        if !state.channels.contains_key(channel) {
            return Ok(true);
        }
        Ok(drop_sub(&mut state, channel, id))
    }

    /// Deliver an encoded message to every subscriber of a channel.
    ///
    /// Handles are collected under the read lock; delivery happens outside
    /// it. A failed enqueue on one client never blocks the others.
    fn broadcast(&self, channel: &str, data: &Bytes, kind: &'static str) {
        let targets: Vec<Arc<dyn ClientHandle>> = {
            let state = self.state.read();
            match state.channels.get(channel) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| state.clients.get(id).cloned())
                    .collect(),
                None => return,
            }
        };

        for client in targets {
            if let Err(e) = client.send(data.clone()) {
                warn!(
                    channel = %channel,
                    client = %client.id(),
                    kind = kind,
                    error = %e,
                    "failed to enqueue message"
                );
            }
        }
    }

    /// Fan a publication out to local subscribers.
    ///
    /// # Errors
    ///
    /// Fails only when the publication cannot be encoded.
    pub fn broadcast_publication(
        &self,
        channel: &str,
        publication: &Publication,
    ) -> Result<(), HubError> {
        let data = self.codec.encode_publication(publication)?;
        self.broadcast(channel, &data, "publication");
        Ok(())
    }

    /// Fan a join event out to local subscribers.
    ///
    /// # Errors
    ///
    /// Fails only when the event cannot be encoded.
    pub fn broadcast_join(&self, channel: &str, join: &Join) -> Result<(), HubError> {
        let data = self.codec.encode_join(join)?;
        self.broadcast(channel, &data, "join");
        Ok(())
    }

    /// Fan a leave event out to local subscribers.
    ///
    /// # Errors
    ///
    /// Fails only when the event cannot be encoded.
    pub fn broadcast_leave(&self, channel: &str, leave: &Leave) -> Result<(), HubError> {
        let data = self.codec.encode_leave(leave)?;
        self.broadcast(channel, &data, "leave");
        Ok(())
    }

    /// Unsubscribe a user from a channel, or from every channel when
    /// `channel` is empty.
    ///
    /// Returns the channels whose subscriber set became empty.
    pub fn unsubscribe(&self, user: &str, channel: &str) -> Vec<String> {
        let mut state = self.state.write();
        let Some(ids) = state.users.get(user) else {
            return Vec::new();
        };
        let ids: Vec<String> = ids.iter().cloned().collect();

        let mut emptied = Vec::new();
        for id in ids {
            let channels: Vec<String> = if channel.is_empty() {
                state
                    .client_channels
                    .get(&id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default()
            } else {
                vec![channel.to_string()]
            };
            for ch in channels {
                if drop_sub(&mut state, &ch, &id) {
                    emptied.push(ch);
                }
            }
        }
        emptied
    }

    /// Close every connection of a user.
    ///
    /// Per-client close errors are logged, not propagated.
    pub fn disconnect(&self, user: &str, reconnect: bool) {
        let targets: Vec<Arc<dyn ClientHandle>> = {
            let state = self.state.read();
            match state.users.get(user) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| state.clients.get(id).cloned())
                    .collect(),
                None => return,
            }
        };

        for client in targets {
            if let Err(e) = client.close(reconnect) {
                warn!(user = %user, client = %client.id(), error = %e, "failed to close connection");
            }
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn num_clients(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Number of distinct connected users.
    #[must_use]
    pub fn num_users(&self) -> usize {
        self.state.read().users.len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.state.read().channels.len()
    }

    /// Number of subscribers on a channel.
    #[must_use]
    pub fn num_subscribers(&self, channel: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Close every connection and drop all indexes.
    pub fn shutdown(&self) {
        let state = std::mem::take(&mut *self.state.write());
        for (id, client) in state.clients {
            if let Err(e) = client.close(true) {
                warn!(client = %id, error = %e, "failed to close connection on shutdown");
            }
        }
    }
}
