//! # surge-core
//!
//! Node kernel for the surge realtime messaging cluster.
//!
//! A [`Node`] multiplexes many client connections subscribed to named
//! channels, delivers publications from any source to every local subscriber,
//! and coordinates with peer nodes through a pluggable [`Engine`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Client    │────▶│    Node     │────▶│   Engine    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │
//!                        ▼       ▼
//!                 ┌──────────┐ ┌──────────────┐
//!                 │   Hub    │ │ PeerRegistry │
//!                 └──────────┘ └──────────────┘
//! ```
//!
//! The hub tracks local connections and subscriptions; the peer registry
//! tracks the other nodes sharing the engine; the engine carries
//! publications and control commands across the cluster and persists
//! history and presence.

pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod events;
pub mod hub;
pub mod metrics;
pub mod node;
pub mod registry;

pub use client::{ClientError, ClientHandle};
pub use config::{ChannelOptions, Config, ConfigError, Namespace};
pub use engine::{Engine, EngineError, HistoryFilter};
pub use events::Mediator;
pub use hub::{Hub, HubError};
pub use node::{Node, NodeError, NodeHandle, NodeInfo};
pub use registry::PeerRegistry;
