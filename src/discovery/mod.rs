//! Membership discovery
//!
//! Tracks the live agent set and emits typed join/leave/update
//! notifications. The concrete implementation gossips over UDP
//! ([`gossip::GossipDiscovery`]); the trait exists so the orchestrator can
//! be exercised against a test double.

pub mod gossip;

pub use gossip::GossipDiscovery;

use crate::agent::Agent;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives membership change notifications.
///
/// Join and update are reported for every member except the local node.
/// Leave is reported uniformly: every member that leaves or fails, local
/// or not, is removed from the table and reported here.
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    async fn on_agent_join(&self, agent: Agent);
    async fn on_agent_leave(&self, agent: Agent);
    async fn on_agent_update(&self, agent: Agent);
}

/// Gossip-backed membership provider.
#[async_trait]
pub trait Discovery: Send + Sync {
    fn set_handler(&self, handler: Arc<dyn DiscoveryHandler>);

    /// Snapshot of the membership table, including the local agent once
    /// the node has announced.
    fn agents(&self) -> Vec<Agent>;

    /// The local node's own entry, once known.
    fn local_agent(&self) -> Option<Agent>;

    /// Begin participating in the membership protocol. Fatal on malformed
    /// bind/seed addresses or socket bind failure.
    async fn start(&self) -> anyhow::Result<()>;

    /// Leave the cluster and stop the event consumer.
    async fn stop(&self);
}
