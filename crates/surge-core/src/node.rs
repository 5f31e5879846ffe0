//! The node: the heart of a surge cluster member.
//!
//! A node keeps and manages client connections through the [`Hub`], maintains
//! information about peer nodes, owns the codecs, and drives the pluggable
//! [`Engine`] that connects it to the rest of the cluster.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use surge_proto::control::{Disconnect, Unsubscribe};
use surge_proto::{
    id, ChannelMessage, ClientInfo, Command, ControlCodec, Join, Leave, MessageCodec, MethodType,
    MsgpackControlCodec, MsgpackMessageCodec, PeerInfo, Publication,
};

use crate::channel;
use crate::client::ClientHandle;
use crate::config::{ChannelOptions, Config, ConfigError};
use crate::engine::{Engine, EngineError, HistoryFilter};
use crate::events::Mediator;
use crate::hub::{Hub, HubError};
use crate::metrics;
use crate::registry::PeerRegistry;

/// How often the node announces itself to the cluster.
const NODE_INFO_PUBLISH_INTERVAL: Duration = Duration::from_secs(3);

/// How often silent peers are expired from the registry.
const NODE_INFO_CLEAN_INTERVAL: Duration = Duration::from_secs(5);

/// How long a peer may stay silent before it is expired.
const NODE_INFO_MAX_DELAY: Duration = Duration::from_secs(15);

/// How often connection gauges are refreshed from the hub.
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Node errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid arguments.
    #[error("bad request")]
    BadRequest,

    /// Channel resolves to an unknown namespace.
    #[error("namespace not found")]
    NamespaceNotFound,

    /// A local hub operation or control broadcast failed.
    #[error("internal server error")]
    Internal,

    /// The node has no engine attached or has been shut down.
    #[error("node is not running")]
    NotRunning,

    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] surge_proto::CodecError),

    /// Hub error.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// Aggregated cluster state returned by [`Node::info`].
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Name of the engine driving this node.
    pub engine: String,
    /// Known peer records, including this node's.
    pub nodes: Vec<PeerInfo>,
}

struct State {
    config: Config,
    engine: Option<Arc<dyn Engine>>,
    shutdown: bool,
}

/// A cluster member process.
///
/// All public operations are safe for concurrent use.
pub struct Node {
    /// Unique id of this node, fixed at construction.
    uid: String,

    /// Unix time the node started.
    started_at: i64,

    /// Config, engine reference and shutdown flag.
    state: RwLock<State>,

    /// Client connections on this node.
    hub: Hub,

    /// Known peer nodes.
    registry: PeerRegistry,

    /// Codec for messages flowing through engine data channels.
    message_codec: Arc<dyn MessageCodec>,

    /// Codec for control commands.
    control_codec: Arc<dyn ControlCodec>,

    /// Application event hooks.
    mediator: RwLock<Option<Arc<dyn Mediator>>>,

    /// Signal observed by every background task.
    shutdown_tx: watch::Sender<bool>,

    /// Background task handles, joined on shutdown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Create a node with the default MessagePack codecs.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_codecs(
            config,
            Arc::new(MsgpackMessageCodec),
            Arc::new(MsgpackControlCodec),
        )
    }

    /// Create a node with injected codecs.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation.
    pub fn with_codecs(
        config: Config,
        message_codec: Arc<dyn MessageCodec>,
        control_codec: Arc<dyn ControlCodec>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let uid = id::node_uid();
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            uid: uid.clone(),
            started_at: unix_now(),
            state: RwLock::new(State {
                config,
                engine: None,
                shutdown: false,
            }),
            hub: Hub::new(message_codec.clone()),
            registry: PeerRegistry::new(uid),
            message_codec,
            control_codec,
            mediator: RwLock::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Unique id of this node.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// A copy of the current config.
    #[must_use]
    pub fn config(&self) -> Config {
        self.state.read().config.clone()
    }

    /// Node version string.
    #[must_use]
    pub fn version(&self) -> String {
        self.state.read().config.version.clone()
    }

    /// The node's hub.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Bind application event hooks.
    pub fn set_mediator(&self, mediator: Arc<dyn Mediator>) {
        *self.mediator.write() = Some(mediator);
    }

    /// Currently bound event hooks, if any.
    #[must_use]
    pub fn mediator(&self) -> Option<Arc<dyn Mediator>> {
        self.mediator.read().clone()
    }

    /// A receiver that observes the shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Replace the config after validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the new config fails validation.
    pub fn reload(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        self.state.write().config = config;
        Ok(())
    }

    fn engine(&self) -> Result<Arc<dyn Engine>, NodeError> {
        self.state.read().engine.clone().ok_or(NodeError::NotRunning)
    }

    /// A cheap, non-owning handle engines use to call back into the node.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> NodeHandle {
        NodeHandle {
            node: Arc::downgrade(self),
        }
    }

    /// Attach the engine and perform all startup actions.
    ///
    /// Must be called once. Announces this node to the cluster immediately
    /// and spawns the background tickers.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is already shut down or the engine fails
    /// to start.
    pub async fn run(self: &Arc<Self>, engine: Arc<dyn Engine>) -> Result<(), NodeError> {
        {
            let mut state = self.state.write();
            if state.shutdown {
                return Err(NodeError::NotRunning);
            }
            state.engine = Some(engine.clone());
        }

        engine.run(self.handle()).await?;

        if let Err(e) = self.pub_node().await {
            error!(error = %e, "error publishing node announcement");
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_announce());
        tasks.push(self.spawn_clean());
        tasks.push(self.spawn_gauge_refresh());

        info!(uid = %self.uid, "node running");
        Ok(())
    }

    /// Shut the node down: stop every background task and close every client
    /// connection. Idempotent. Engine teardown is the caller's concern.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.hub.shutdown();
        info!(uid = %self.uid, "node stopped");
    }

    fn spawn_announce(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::downgrade(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    () = tokio::time::sleep(NODE_INFO_PUBLISH_INTERVAL) => {
                        let Some(node) = node.upgrade() else { return };
                        if let Err(e) = node.pub_node().await {
                            error!(error = %e, "error publishing node announcement");
                        }
                    }
                }
            }
        })
    }

    fn spawn_clean(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::downgrade(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    () = tokio::time::sleep(NODE_INFO_CLEAN_INTERVAL) => {
                        let Some(node) = node.upgrade() else { return };
                        node.registry.clean(NODE_INFO_MAX_DELAY);
                    }
                }
            }
        })
    }

    fn spawn_gauge_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::downgrade(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    () = tokio::time::sleep(GAUGE_REFRESH_INTERVAL) => {
                        let Some(node) = node.upgrade() else { return };
                        node.refresh_gauges();
                    }
                }
            }
        })
    }

    fn refresh_gauges(&self) {
        metrics::update_node_gauges(
            self.hub.num_clients(),
            self.hub.num_users(),
            self.hub.num_channels(),
        );
    }

    // --- Publication pipeline ---------------------------------------------

    /// Publish into a channel.
    ///
    /// Every node subscribed to the channel receives the publication and
    /// fans it out to its local subscribers. A publication arriving with an
    /// empty uid gets a unique id stamped in place.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceNotFound` for a channel in an unknown namespace,
    /// or the engine's error.
    pub async fn publish(
        &self,
        channel: &str,
        publication: &mut Publication,
    ) -> Result<(), NodeError> {
        self.publish_with_opts(channel, publication, None).await
    }

    /// Publish into a channel with pre-resolved channel options.
    ///
    /// # Errors
    ///
    /// As [`Node::publish`].
    pub async fn publish_with_opts(
        &self,
        channel: &str,
        publication: &mut Publication,
        options: Option<&ChannelOptions>,
    ) -> Result<(), NodeError> {
        let options = match options {
            Some(options) => options.clone(),
            None => self
                .channel_opts(channel)
                .ok_or(NodeError::NamespaceNotFound)?,
        };

        metrics::record_message_sent("publication");

        if publication.uid.is_empty() {
            publication.uid = id::next();
        }

        let engine = self.engine()?;
        Ok(engine.publish(channel, publication, &options).await?)
    }

    /// Publish a join event into a channel.
    ///
    /// Whether the namespace wants join events broadcast is the caller's
    /// check, via `ChannelOptions::join_leave`.
    ///
    /// # Errors
    ///
    /// As [`Node::publish`].
    pub async fn publish_join(
        &self,
        channel: &str,
        join: &Join,
        options: Option<&ChannelOptions>,
    ) -> Result<(), NodeError> {
        let options = match options {
            Some(options) => options.clone(),
            None => self
                .channel_opts(channel)
                .ok_or(NodeError::NamespaceNotFound)?,
        };
        metrics::record_message_sent("join");
        let engine = self.engine()?;
        Ok(engine.publish_join(channel, join, &options).await?)
    }

    /// Publish a leave event into a channel.
    ///
    /// # Errors
    ///
    /// As [`Node::publish`].
    pub async fn publish_leave(
        &self,
        channel: &str,
        leave: &Leave,
        options: Option<&ChannelOptions>,
    ) -> Result<(), NodeError> {
        let options = match options {
            Some(options) => options.clone(),
            None => self
                .channel_opts(channel)
                .ok_or(NodeError::NamespaceNotFound)?,
        };
        metrics::record_message_sent("leave");
        let engine = self.engine()?;
        Ok(engine.publish_leave(channel, leave, &options).await?)
    }

    /// Handle a message delivered by the engine for a data channel.
    fn handle_message(&self, channel: &str, body: &[u8]) -> Result<(), NodeError> {
        let message = match self.message_codec.decode(body) {
            Ok(message) => message,
            Err(e) => {
                error!(channel = %channel, error = %e, "error decoding channel message");
                return Err(e.into());
            }
        };

        metrics::record_message_received(message.kind());

        if self.hub.num_subscribers(channel) == 0 {
            return Ok(());
        }

        match message {
            ChannelMessage::Publication(publication) => {
                self.hub.broadcast_publication(channel, &publication)?;
            }
            ChannelMessage::Join(join) => {
                self.hub.broadcast_join(channel, &join)?;
            }
            ChannelMessage::Leave(leave) => {
                self.hub.broadcast_leave(channel, &leave)?;
            }
        }
        Ok(())
    }

    // --- Control plane ----------------------------------------------------

    /// Handle a control command delivered by the engine.
    ///
    /// Commands originating from this node are a no-op.
    async fn handle_control(&self, command: Command) -> Result<(), NodeError> {
        metrics::record_message_received("control");

        if command.uid == self.uid {
            // Sent by this node.
            return Ok(());
        }

        match command.method {
            MethodType::Node => {
                let peer = self.control_codec.decode_peer(&command.params).map_err(|e| {
                    error!(error = %e, "error decoding node control params");
                    NodeError::from(e)
                })?;
                self.registry.add(peer);
                Ok(())
            }
            MethodType::Unsubscribe => {
                let unsubscribe =
                    self.control_codec
                        .decode_unsubscribe(&command.params)
                        .map_err(|e| {
                            error!(error = %e, "error decoding unsubscribe control params");
                            NodeError::from(e)
                        })?;
                self.unsubscribe_local(&unsubscribe.user, &unsubscribe.channel)
                    .await
            }
            MethodType::Disconnect => {
                let disconnect =
                    self.control_codec
                        .decode_disconnect(&command.params)
                        .map_err(|e| {
                            error!(error = %e, "error decoding disconnect control params");
                            NodeError::from(e)
                        })?;
                self.hub.disconnect(&disconnect.user, false);
                Ok(())
            }
        }
    }

    async fn publish_control(&self, command: Command) -> Result<(), NodeError> {
        metrics::record_message_sent("control");
        let engine = self.engine()?;
        Ok(engine.publish_control(&command).await?)
    }

    /// Announce this node's current state to the cluster.
    async fn pub_node(&self) -> Result<(), NodeError> {
        let peer = {
            let state = self.state.read();
            PeerInfo {
                uid: self.uid.clone(),
                name: state.config.name.clone(),
                version: state.config.version.clone(),
                num_clients: self.hub.num_clients() as u32,
                num_users: self.hub.num_users() as u32,
                num_channels: self.hub.num_channels() as u32,
                uptime: (unix_now() - self.started_at).max(0) as u32,
            }
        };

        let params = self.control_codec.encode_peer(&peer)?;
        let command = Command {
            uid: self.uid.clone(),
            method: MethodType::Node,
            params,
        };

        // The local registry update precedes the broadcast.
        self.registry.add(peer);

        self.publish_control(command).await
    }

    async fn pub_unsubscribe(&self, user: &str, channel: &str) -> Result<(), NodeError> {
        let params = self.control_codec.encode_unsubscribe(&Unsubscribe {
            user: user.to_string(),
            channel: channel.to_string(),
        })?;
        let command = Command {
            uid: self.uid.clone(),
            method: MethodType::Unsubscribe,
            params,
        };
        self.publish_control(command).await
    }

    /// The control payload carries only the user; the reconnect advice stays
    /// local to the node that initiated the disconnect.
    async fn pub_disconnect(&self, user: &str) -> Result<(), NodeError> {
        let params = self.control_codec.encode_disconnect(&Disconnect {
            user: user.to_string(),
        })?;
        let command = Command {
            uid: self.uid.clone(),
            method: MethodType::Disconnect,
            params,
        };
        self.publish_control(command).await
    }

    /// Unsubscribe a user locally and release emptied engine subscriptions.
    async fn unsubscribe_local(&self, user: &str, channel: &str) -> Result<(), NodeError> {
        let emptied = self.hub.unsubscribe(user, channel);
        if emptied.is_empty() {
            return Ok(());
        }
        let engine = self.engine()?;
        for ch in emptied {
            engine.unsubscribe(&ch).await?;
        }
        Ok(())
    }

    // --- Client/session integration ---------------------------------------

    /// Register an authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns an error when a client with the same id is already registered.
    pub fn add_client(&self, client: Arc<dyn ClientHandle>) -> Result<(), NodeError> {
        metrics::record_action("add_client");
        Ok(self.hub.add(client)?)
    }

    /// Remove a connection from the registry and release emptied engine
    /// subscriptions.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when releasing a subscription fails.
    pub async fn remove_client(&self, client_id: &str) -> Result<(), NodeError> {
        metrics::record_action("remove_client");
        let emptied = self.hub.remove(client_id);
        if emptied.is_empty() {
            return Ok(());
        }
        let engine = self.engine()?;
        for ch in emptied {
            engine.unsubscribe(&ch).await?;
        }
        Ok(())
    }

    /// Register a channel subscription in both the hub and, for the first
    /// local subscriber, the engine.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown client or a failed engine subscribe.
    pub async fn add_subscription(
        &self,
        channel: &str,
        client: &dyn ClientHandle,
    ) -> Result<(), NodeError> {
        metrics::record_action("add_subscription");
        let first = self.hub.add_sub(channel, client)?;
        if first {
            self.engine()?.subscribe(channel).await?;
        }
        Ok(())
    }

    /// Remove a channel subscription from both the hub and, for the last
    /// local subscriber, the engine.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown client or a failed engine unsubscribe.
    pub async fn remove_subscription(
        &self,
        channel: &str,
        client: &dyn ClientHandle,
    ) -> Result<(), NodeError> {
        metrics::record_action("remove_subscription");
        let empty = self.hub.remove_sub(channel, client)?;
        if empty {
            self.engine()?.unsubscribe(channel).await?;
        }
        Ok(())
    }

    // --- Public API façade ------------------------------------------------

    /// Unsubscribe a user from a channel on every node. An empty channel
    /// unsubscribes the user from all channels.
    ///
    /// The local hub changes first; the control broadcast follows. A failed
    /// broadcast leaves peers out of sync until the next announce cycle.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty user, `NamespaceNotFound` for a channel in
    /// an unknown namespace, `Internal` when the local step or the broadcast
    /// fails.
    pub async fn unsubscribe(&self, user: &str, channel: &str) -> Result<(), NodeError> {
        if user.is_empty() {
            return Err(NodeError::BadRequest);
        }
        if !channel.is_empty() && self.channel_opts(channel).is_none() {
            return Err(NodeError::NamespaceNotFound);
        }

        if let Err(e) = self.unsubscribe_local(user, channel).await {
            error!(user = %user, channel = %channel, error = %e, "local unsubscribe failed");
            return Err(NodeError::Internal);
        }
        if let Err(e) = self.pub_unsubscribe(user, channel).await {
            error!(user = %user, channel = %channel, error = %e, "unsubscribe broadcast failed");
            return Err(NodeError::Internal);
        }
        Ok(())
    }

    /// Close all connections of a user on every node.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty user, `Internal` when the broadcast fails.
    pub async fn disconnect(&self, user: &str, reconnect: bool) -> Result<(), NodeError> {
        if user.is_empty() {
            return Err(NodeError::BadRequest);
        }

        self.hub.disconnect(user, reconnect);

        if let Err(e) = self.pub_disconnect(user).await {
            error!(user = %user, error = %e, "disconnect broadcast failed");
            return Err(NodeError::Internal);
        }
        Ok(())
    }

    /// Active clients in a channel across the cluster.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn presence(&self, channel: &str) -> Result<HashMap<String, ClientInfo>, NodeError> {
        metrics::record_action("presence");
        Ok(self.engine()?.presence(channel).await?)
    }

    /// Record a client as present on a channel, with the configured TTL.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn add_presence(
        &self,
        channel: &str,
        client_id: &str,
        info: &ClientInfo,
    ) -> Result<(), NodeError> {
        let expire = self.state.read().config.presence_expire();
        metrics::record_action("add_presence");
        Ok(self
            .engine()?
            .add_presence(channel, client_id, info, expire)
            .await?)
    }

    /// Remove a client's presence entry.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn remove_presence(&self, channel: &str, client_id: &str) -> Result<(), NodeError> {
        metrics::record_action("remove_presence");
        Ok(self.engine()?.remove_presence(channel, client_id).await?)
    }

    /// Retained publications for a channel.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn history(&self, channel: &str) -> Result<Vec<Publication>, NodeError> {
        metrics::record_action("history");
        Ok(self
            .engine()?
            .history(channel, HistoryFilter { limit: 0 })
            .await?)
    }

    /// Drop retained publications for a channel.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn remove_history(&self, channel: &str) -> Result<(), NodeError> {
        metrics::record_action("remove_history");
        Ok(self.engine()?.remove_history(channel).await?)
    }

    /// Uid of the most recent publication in a channel, if any.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn last_message_id(&self, channel: &str) -> Result<Option<String>, NodeError> {
        metrics::record_action("last_message_id");
        let publications = self
            .engine()?
            .history(channel, HistoryFilter { limit: 1 })
            .await?;
        Ok(publications.into_iter().next().map(|p| p.uid))
    }

    /// Channels with at least one subscriber across the cluster.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub async fn channels(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.engine()?.channels().await?)
    }

    /// Aggregated stats from every known node.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` before an engine is attached.
    pub fn info(&self) -> Result<NodeInfo, NodeError> {
        let engine = self.engine()?;
        Ok(NodeInfo {
            engine: engine.name().to_string(),
            nodes: self.registry.list(),
        })
    }

    // --- Channel grammar --------------------------------------------------

    /// Channel options for a channel, resolved through its namespace.
    #[must_use]
    pub fn channel_opts(&self, ch: &str) -> Option<ChannelOptions> {
        let state = self.state.read();
        state
            .config
            .channel_opts(channel::namespace_name(&state.config, ch))
    }

    /// Whether the channel requires a signed private subscription.
    #[must_use]
    pub fn is_private_channel(&self, ch: &str) -> bool {
        channel::is_private(&self.state.read().config, ch)
    }

    /// Whether a user may subscribe to the channel.
    #[must_use]
    pub fn user_allowed(&self, ch: &str, user: &str) -> bool {
        channel::user_allowed(&self.state.read().config, ch, user)
    }

    /// Whether a specific client connection may subscribe to the channel.
    #[must_use]
    pub fn client_allowed(&self, ch: &str, client: &str) -> bool {
        channel::client_allowed(&self.state.read().config, ch, client)
    }
}

/// Non-owning handle to a node, given to the engine at [`Node::run`].
///
/// The engine delivers inbound traffic through this handle; once the node is
/// dropped the handle reports `NotRunning`.
#[derive(Clone)]
pub struct NodeHandle {
    node: Weak<Node>,
}

impl NodeHandle {
    /// Deliver a message received on a data channel.
    ///
    /// # Errors
    ///
    /// Returns a codec error for an undecodable body; the message is dropped
    /// and the node keeps running.
    pub fn client_message(&self, channel: &str, body: &[u8]) -> Result<(), NodeError> {
        let node = self.node.upgrade().ok_or(NodeError::NotRunning)?;
        node.handle_message(channel, body)
    }

    /// Deliver a control command received on the control channel.
    ///
    /// # Errors
    ///
    /// Returns a codec error for undecodable params; the command is dropped
    /// and the node keeps running.
    pub async fn control_command(&self, command: Command) -> Result<(), NodeError> {
        let node = self.node.upgrade().ok_or(NodeError::NotRunning)?;
        node.handle_control(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::MockClient;
    use crate::config::Namespace;
    use parking_lot::Mutex;
    use surge_proto::MsgpackMessageCodec;

    /// Engine that records every call for assertions.
    #[derive(Default)]
    struct RecordingEngine {
        subscribes: Mutex<Vec<String>>,
        unsubscribes: Mutex<Vec<String>>,
        published: Mutex<Vec<(String, Publication)>>,
        control: Mutex<Vec<Command>>,
        history: Mutex<Vec<Publication>>,
    }

    #[async_trait::async_trait]
    impl Engine for RecordingEngine {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn run(&self, _node: NodeHandle) -> Result<(), EngineError> {
            Ok(())
        }

        async fn publish(
            &self,
            channel: &str,
            publication: &Publication,
            _options: &ChannelOptions,
        ) -> Result<(), EngineError> {
            self.published
                .lock()
                .push((channel.to_string(), publication.clone()));
            Ok(())
        }

        async fn publish_join(
            &self,
            _channel: &str,
            _join: &Join,
            _options: &ChannelOptions,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn publish_leave(
            &self,
            _channel: &str,
            _leave: &Leave,
            _options: &ChannelOptions,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn publish_control(&self, command: &Command) -> Result<(), EngineError> {
            self.control.lock().push(command.clone());
            Ok(())
        }

        async fn subscribe(&self, channel: &str) -> Result<(), EngineError> {
            self.subscribes.lock().push(channel.to_string());
            Ok(())
        }

        async fn unsubscribe(&self, channel: &str) -> Result<(), EngineError> {
            self.unsubscribes.lock().push(channel.to_string());
            Ok(())
        }

        async fn channels(&self) -> Result<Vec<String>, EngineError> {
            let unsubscribed = self.unsubscribes.lock().clone();
            Ok(self
                .subscribes
                .lock()
                .iter()
                .filter(|ch| !unsubscribed.contains(*ch))
                .cloned()
                .collect())
        }

        async fn history(
            &self,
            _channel: &str,
            filter: HistoryFilter,
        ) -> Result<Vec<Publication>, EngineError> {
            let history = self.history.lock();
            let limit = if filter.limit == 0 {
                history.len()
            } else {
                filter.limit
            };
            Ok(history.iter().take(limit).cloned().collect())
        }

        async fn remove_history(&self, _channel: &str) -> Result<(), EngineError> {
            self.history.lock().clear();
            Ok(())
        }

        async fn add_presence(
            &self,
            _channel: &str,
            _client_id: &str,
            _info: &ClientInfo,
            _expire: Duration,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn remove_presence(
            &self,
            _channel: &str,
            _client_id: &str,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn presence(
            &self,
            _channel: &str,
        ) -> Result<HashMap<String, ClientInfo>, EngineError> {
            Ok(HashMap::new())
        }
    }

    fn config() -> Config {
        Config {
            name: "test-node".into(),
            version: "0.1.0".into(),
            namespaces: vec![Namespace {
                name: "chat".into(),
                options: ChannelOptions {
                    presence: true,
                    join_leave: true,
                    ..ChannelOptions::default()
                },
            }],
            ..Config::default()
        }
    }

    async fn running_node() -> (Arc<Node>, Arc<RecordingEngine>) {
        let node = Arc::new(Node::new(config()).unwrap());
        let engine = Arc::new(RecordingEngine::default());
        node.run(engine.clone()).await.unwrap();
        (node, engine)
    }

    #[tokio::test]
    async fn test_run_announces_self() {
        let (node, engine) = running_node().await;

        // The node registered itself locally before broadcasting.
        let info = node.info().unwrap();
        assert_eq!(info.engine, "recording");
        assert_eq!(info.nodes.len(), 1);
        assert_eq!(info.nodes[0].uid, node.uid());
        assert_eq!(info.nodes[0].name, "test-node");

        let control = engine.control.lock();
        assert_eq!(control.len(), 1);
        assert_eq!(control[0].uid, node.uid());
        assert_eq!(control[0].method, MethodType::Node);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_subscriber_drives_engine_subscription() {
        let (node, engine) = running_node().await;
        let c1 = MockClient::new("c1", "u1");
        let c2 = MockClient::new("c2", "u2");
        node.add_client(c1.clone()).unwrap();
        node.add_client(c2.clone()).unwrap();

        node.add_subscription("chat:lobby", c1.as_ref())
            .await
            .unwrap();
        assert_eq!(*engine.subscribes.lock(), vec!["chat:lobby".to_string()]);

        node.add_subscription("chat:lobby", c2.as_ref())
            .await
            .unwrap();
        assert_eq!(engine.subscribes.lock().len(), 1);

        node.remove_subscription("chat:lobby", c1.as_ref())
            .await
            .unwrap();
        assert!(engine.unsubscribes.lock().is_empty());

        node.remove_subscription("chat:lobby", c2.as_ref())
            .await
            .unwrap();
        assert_eq!(*engine.unsubscribes.lock(), vec!["chat:lobby".to_string()]);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_stamps_missing_uid() {
        let (node, engine) = running_node().await;

        let mut publication = Publication::new(b"hi".to_vec());
        node.publish("chat:lobby", &mut publication).await.unwrap();
        assert_eq!(publication.uid.len(), 22);

        // A caller-provided uid is kept.
        let mut tagged = Publication::new(b"hi".to_vec());
        tagged.uid = "custom".into();
        node.publish("chat:lobby", &mut tagged).await.unwrap();
        assert_eq!(tagged.uid, "custom");

        let published = engine.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "chat:lobby");
        assert_eq!(published[1].1.uid, "custom");

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_unknown_namespace() {
        let (node, _engine) = running_node().await;
        let mut publication = Publication::new(b"hi".to_vec());
        assert!(matches!(
            node.publish("nope:x", &mut publication).await,
            Err(NodeError::NamespaceNotFound)
        ));
        // Root namespace channels always resolve.
        assert!(node.publish("lobby", &mut publication).await.is_ok());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_publication_fans_out() {
        let (node, _engine) = running_node().await;
        let codec = MsgpackMessageCodec;
        let c1 = MockClient::new("c1", "u1");
        let c2 = MockClient::new("c2", "u2");
        node.add_client(c1.clone()).unwrap();
        node.add_client(c2.clone()).unwrap();
        node.add_subscription("chat:lobby", c1.as_ref())
            .await
            .unwrap();
        node.add_subscription("chat:lobby", c2.as_ref())
            .await
            .unwrap();

        let publication = Publication {
            uid: "p1".into(),
            data: bytes::Bytes::from_static(b"hi"),
            info: None,
        };
        let body = codec.encode_publication(&publication).unwrap();

        let handle = node.handle();
        handle.client_message("chat:lobby", &body).unwrap();

        for client in [&c1, &c2] {
            assert_eq!(client.sent_count(), 1);
            let decoded = codec.decode(&client.sent.lock()[0]).unwrap();
            assert_eq!(decoded, ChannelMessage::Publication(publication.clone()));
        }

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_message_without_subscribers_is_dropped() {
        let (node, _engine) = running_node().await;
        let codec = MsgpackMessageCodec;
        let body = codec
            .encode_publication(&Publication::new(b"x".to_vec()))
            .unwrap();

        // No local subscribers: delivered nowhere, no error.
        node.handle().client_message("chat:empty", &body).unwrap();

        // Garbage is rejected without tearing anything down.
        assert!(node.handle().client_message("chat:empty", b"junk").is_err());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_control_self_suppression() {
        let (node, _engine) = running_node().await;
        let codec = MsgpackControlCodec;
        let c1 = MockClient::new("c1", "u1");
        node.add_client(c1.clone()).unwrap();

        let params = codec
            .encode_disconnect(&Disconnect { user: "u1".into() })
            .unwrap();
        let own = Command {
            uid: node.uid().to_string(),
            method: MethodType::Disconnect,
            params: params.clone(),
        };
        node.handle().control_command(own).await.unwrap();
        assert!(!c1.is_closed());

        // The same command from a peer takes effect.
        let foreign = Command {
            uid: "other-node".into(),
            method: MethodType::Disconnect,
            params,
        };
        node.handle().control_command(foreign).await.unwrap();
        assert!(c1.is_closed());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_control_node_announce_updates_registry() {
        let (node, _engine) = running_node().await;
        let codec = MsgpackControlCodec;
        let peer = PeerInfo {
            uid: "peer-1".into(),
            name: "west-2".into(),
            num_clients: 4,
            ..PeerInfo::default()
        };
        let command = Command {
            uid: "peer-1".into(),
            method: MethodType::Node,
            params: codec.encode_peer(&peer).unwrap(),
        };

        node.handle().control_command(command).await.unwrap();

        let info = node.info().unwrap();
        assert_eq!(info.nodes.len(), 2);
        let stored = info.nodes.iter().find(|n| n.uid == "peer-1").unwrap();
        assert_eq!(stored.name, "west-2");
        assert_eq!(stored.num_clients, 4);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_cluster_unsubscribe() {
        let (n1, e1) = running_node().await;
        let c1 = MockClient::new("c1", "u1");
        n1.add_client(c1.clone()).unwrap();
        n1.add_subscription("chat:lobby", c1.as_ref()).await.unwrap();

        n1.unsubscribe("u1", "chat:lobby").await.unwrap();

        // Local removal happened immediately.
        assert_eq!(n1.hub().num_subscribers("chat:lobby"), 0);
        assert_eq!(*e1.unsubscribes.lock(), vec!["chat:lobby".to_string()]);

        // A control command was broadcast with this node's uid.
        let command = {
            let control = e1.control.lock();
            control
                .iter()
                .find(|c| c.method == MethodType::Unsubscribe)
                .cloned()
                .unwrap()
        };
        assert_eq!(command.uid, n1.uid());
        let codec = MsgpackControlCodec;
        let unsubscribe = codec.decode_unsubscribe(&command.params).unwrap();
        assert_eq!(unsubscribe.user, "u1");
        assert_eq!(unsubscribe.channel, "chat:lobby");

        // A second node receiving the command removes the user too.
        let (n2, e2) = running_node().await;
        let remote = MockClient::new("c9", "u1");
        n2.add_client(remote.clone()).unwrap();
        n2.add_subscription("chat:lobby", remote.as_ref())
            .await
            .unwrap();

        n2.handle().control_command(command).await.unwrap();
        assert_eq!(n2.hub().num_subscribers("chat:lobby"), 0);
        assert_eq!(*e2.unsubscribes.lock(), vec!["chat:lobby".to_string()]);

        n1.shutdown().await;
        n2.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_validations() {
        let (node, _engine) = running_node().await;
        assert!(matches!(
            node.unsubscribe("", "chat:lobby").await,
            Err(NodeError::BadRequest)
        ));
        assert!(matches!(
            node.unsubscribe("u1", "nope:x").await,
            Err(NodeError::NamespaceNotFound)
        ));
        // Empty channel means all channels and skips namespace resolution.
        assert!(node.unsubscribe("u1", "").await.is_ok());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_user_only() {
        let (node, engine) = running_node().await;
        let c1 = MockClient::new("c1", "u1");
        node.add_client(c1.clone()).unwrap();

        assert!(matches!(
            node.disconnect("", true).await,
            Err(NodeError::BadRequest)
        ));

        node.disconnect("u1", true).await.unwrap();
        assert_eq!(*c1.closed.lock(), Some(true));

        let command = {
            let control = engine.control.lock();
            control
                .iter()
                .find(|c| c.method == MethodType::Disconnect)
                .cloned()
                .unwrap()
        };
        let codec = MsgpackControlCodec;
        let disconnect = codec.decode_disconnect(&command.params).unwrap();
        assert_eq!(disconnect.user, "u1");

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_client_releases_subscriptions() {
        let (node, engine) = running_node().await;
        let c1 = MockClient::new("c1", "u1");
        node.add_client(c1.clone()).unwrap();
        node.add_subscription("chat:lobby", c1.as_ref()).await.unwrap();

        node.remove_client("c1").await.unwrap();
        assert_eq!(node.hub().num_clients(), 0);
        assert_eq!(*engine.unsubscribes.lock(), vec!["chat:lobby".to_string()]);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_last_message_id() {
        let (node, engine) = running_node().await;
        assert_eq!(node.last_message_id("chat:lobby").await.unwrap(), None);

        engine.history.lock().push(Publication {
            uid: "p9".into(),
            data: bytes::Bytes::from_static(b"x"),
            info: None,
        });
        assert_eq!(
            node.last_message_id("chat:lobby").await.unwrap(),
            Some("p9".to_string())
        );

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_empties_hub() {
        let (node, _engine) = running_node().await;
        let c1 = MockClient::new("c1", "u1");
        node.add_client(c1.clone()).unwrap();

        node.shutdown().await;
        assert!(c1.is_closed());
        assert_eq!(node.hub().num_clients(), 0);
        assert!(node.tasks.lock().is_empty());

        // Second shutdown is a no-op.
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_validates() {
        let (node, _engine) = running_node().await;

        let bad = Config {
            channel_namespace_boundary: String::new(),
            ..Config::default()
        };
        assert!(node.reload(bad).is_err());

        let good = Config {
            name: "renamed".into(),
            ..config()
        };
        node.reload(good).unwrap();
        assert_eq!(node.config().name, "renamed");

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_channel_opts_resolution() {
        let node = Arc::new(Node::new(config()).unwrap());
        assert!(node.channel_opts("chat:lobby").unwrap().presence);
        assert!(!node.channel_opts("lobby").unwrap().presence);
        assert!(node.channel_opts("missing:x").is_none());

        assert!(node.is_private_channel("$chat:secret"));
        assert!(node.user_allowed("room#alice,bob", "alice"));
        assert!(!node.user_allowed("room#alice,bob", "carol"));
        assert!(node.client_allowed("room&C1", "C1"));
        assert!(!node.client_allowed("room&C1", "C2"));
    }

    #[tokio::test]
    async fn test_api_requires_running_engine() {
        let node = Arc::new(Node::new(config()).unwrap());
        let mut publication = Publication::new(b"x".to_vec());
        assert!(matches!(
            node.publish("chat:lobby", &mut publication).await,
            Err(NodeError::NotRunning)
        ));
        assert!(matches!(node.info(), Err(NodeError::NotRunning)));
    }
}
