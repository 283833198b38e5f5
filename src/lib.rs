//! mqtt-bridge
//!
//! Turns a collection of independent single-node MQTT brokers into one
//! logical cluster.
//!
//! ## Architecture
//!
//! - **Discovery (gossip)**: cluster membership and failure detection over UDP
//! - **Transport (QUIC)**: one outbound RPC connection per known peer,
//!   broadcast-style replication of client events
//! - **Bridge**: orchestrates both, applying inbound events to the local
//!   broker through the narrow [`broker::Broker`] contract
//!
//! ## How it works
//!
//! 1. Nodes discover each other via the gossip protocol; every gossip
//!    message carries the sender's RPC port so peers know where to dial
//! 2. Each membership join/update opens a pooled connection to that peer;
//!    each leave closes it
//! 3. Local client events (connect, disconnect, publish) are broadcast to
//!    every pooled peer except the node itself
//! 4. Inbound events are applied locally: a duplicate live session is
//!    force-closed (last connect wins), a replicated publish is injected as
//!    if published by an internal system client and never re-broadcast

pub mod agent;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod hook;
pub mod transport;

pub use agent::Agent;
pub use bridge::{Bridge, BridgeBuilder};
pub use broker::{Broker, CloseReason, Session};
pub use config::{load_options, Options};
pub use discovery::{Discovery, DiscoveryHandler, GossipDiscovery};
pub use error::BridgeError;
pub use hook::{BridgeHook, HOOK_ID};
pub use transport::{Envelope, Response, RpcTransport, Transport, TransportHandler};
