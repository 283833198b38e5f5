//! Agent identity
//!
//! An [`Agent`] names one cluster node: its stable id plus the network
//! coordinates peers need to reach it (gossip address/port and the RPC
//! port it replicates over).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Identity and network coordinates of one cluster node.
///
/// Immutable once constructed. Identity is `id`: two agents with the same
/// id are the same node even if the other fields are stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique, stable node identifier (the gossip node name).
    pub id: String,
    /// Address the node gossips on.
    pub addr: String,
    /// Gossip port.
    pub port: u16,
    /// Port the node's replication RPC listener is bound to.
    ///
    /// Carried as a string: a node whose gossip metadata was malformed
    /// advertises an empty port, which fails at dial time rather than
    /// at translation time.
    pub rpc_port: String,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        addr: impl Into<String>,
        port: u16,
        rpc_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            port,
            rpc_port: rpc_port.into(),
        }
    }

    /// Build an agent from a gossip advertise address plus the RPC port tag.
    pub fn from_gossip(id: impl Into<String>, gossip_addr: SocketAddr, rpc_port: impl Into<String>) -> Self {
        Self::new(id, gossip_addr.ip().to_string(), gossip_addr.port(), rpc_port)
    }

    /// Whether `id` names this agent. Used for self-exclusion checks.
    pub fn is_self(&self, id: &str) -> bool {
        self.id == id
    }

    /// Address of the node's gossip endpoint.
    pub fn gossip_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.addr, self.port).parse()
    }

    /// Address of the node's replication RPC endpoint.
    ///
    /// Fails for a zero-value `rpc_port`; callers log and abandon the dial.
    pub fn rpc_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.addr, self.rpc_port).parse()
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.addr, self.port)
    }
}
