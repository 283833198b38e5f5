//! Replication transport
//!
//! Maintains one outbound RPC connection per known remote agent and exposes
//! broadcast-style push operations; the server side dispatches inbound calls
//! to a [`TransportHandler`]. The concrete implementation is QUIC-based
//! ([`rpc::RpcTransport`]); the trait exists so the orchestrator can be
//! exercised against a test double.

pub mod rpc;
pub mod wire;

pub use rpc::RpcTransport;
pub use wire::{Envelope, Response};

use crate::agent::Agent;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives replicated events arriving from remote agents.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    async fn on_connect(&self, agent_id: &str, client_id: &str);
    async fn on_disconnect(&self, agent_id: &str, client_id: &str);
    async fn on_publish(&self, agent_id: &str, topic: &str, payload: &[u8], qos: u8, retain: bool);
}

/// Point-to-point replication transport.
///
/// `join`/`leave`/`update` are connection-pool lifecycle hooks invoked by the
/// orchestrator in response to membership changes. The `push_*` operations
/// broadcast one event to every pooled peer except the local agent itself and
/// return the number of peers that acknowledged.
#[async_trait]
pub trait Transport: Send + Sync {
    fn set_handler(&self, handler: Arc<dyn TransportHandler>);

    /// Open a pooled connection to `agent` if none exists. Idempotent.
    async fn join(&self, agent: &Agent);

    /// Close and drop the pooled connection to `agent`, if any.
    async fn leave(&self, agent: &Agent);

    /// Same pool semantics as [`join`](Transport::join): only dials when the
    /// agent has no pooled connection yet.
    async fn update(&self, agent: &Agent);

    async fn push_connect(&self, local: &Agent, client_id: &str) -> usize;
    async fn push_disconnect(&self, local: &Agent, client_id: &str) -> usize;
    async fn push_publish(
        &self,
        local: &Agent,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> usize;

    /// Bind the RPC listener. Fatal on bind failure.
    async fn start(&self) -> anyhow::Result<()>;

    /// Close every pooled connection, then the listener.
    async fn stop(&self);
}
