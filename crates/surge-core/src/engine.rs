//! Delivery substrate abstraction.
//!
//! An engine carries publications and control commands between nodes and
//! persists channel history and presence. The kernel is engine-agnostic: an
//! in-memory engine serves a single node, a broker-backed engine a cluster.
//!
//! The engine delivers inbound traffic back to the kernel through the
//! [`NodeHandle`](crate::node::NodeHandle) it receives at [`Engine::run`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use surge_proto::{ClientInfo, Command, Join, Leave, Publication};

use crate::config::ChannelOptions;
use crate::node::NodeHandle;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine has not been started or is already stopped.
    #[error("engine is not running")]
    NotRunning,

    /// Codec error while framing engine traffic.
    #[error("Codec error: {0}")]
    Codec(#[from] surge_proto::CodecError),

    /// I/O error talking to the delivery substrate.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Substrate-specific failure.
    #[error("{0}")]
    Other(String),
}

/// History request bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
    /// Maximum number of publications to return; zero means no limit.
    pub limit: usize,
}

/// Pluggable delivery substrate consumed by the node.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine name, shown in cluster info.
    fn name(&self) -> &'static str;

    /// Start the engine. The handle is the engine's way back into the node
    /// for inbound channel messages and control commands.
    async fn run(&self, node: NodeHandle) -> Result<(), EngineError>;

    /// Broadcast a publication to every node subscribed to the channel.
    async fn publish(
        &self,
        channel: &str,
        publication: &Publication,
        options: &ChannelOptions,
    ) -> Result<(), EngineError>;

    /// Broadcast a join event.
    async fn publish_join(
        &self,
        channel: &str,
        join: &Join,
        options: &ChannelOptions,
    ) -> Result<(), EngineError>;

    /// Broadcast a leave event.
    async fn publish_leave(
        &self,
        channel: &str,
        leave: &Leave,
        options: &ChannelOptions,
    ) -> Result<(), EngineError>;

    /// Broadcast a control command to every node.
    async fn publish_control(&self, command: &Command) -> Result<(), EngineError>;

    /// Start receiving channel messages for a channel.
    async fn subscribe(&self, channel: &str) -> Result<(), EngineError>;

    /// Stop receiving channel messages for a channel.
    async fn unsubscribe(&self, channel: &str) -> Result<(), EngineError>;

    /// Channels with at least one subscriber across the cluster.
    async fn channels(&self) -> Result<Vec<String>, EngineError>;

    /// Retained publications for a channel.
    async fn history(
        &self,
        channel: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<Publication>, EngineError>;

    /// Drop retained publications for a channel.
    async fn remove_history(&self, channel: &str) -> Result<(), EngineError>;

    /// Record a client as present on a channel.
    async fn add_presence(
        &self,
        channel: &str,
        client_id: &str,
        info: &ClientInfo,
        expire: Duration,
    ) -> Result<(), EngineError>;

    /// Remove a client's presence entry.
    async fn remove_presence(&self, channel: &str, client_id: &str) -> Result<(), EngineError>;

    /// Presence map for a channel.
    async fn presence(&self, channel: &str) -> Result<HashMap<String, ClientInfo>, EngineError>;
}
