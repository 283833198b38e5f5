//! Bridge configuration
//!
//! Static settings for one node: display name, gossip bind/advertise
//! addresses, replication RPC port, and the seed peer list.

use crate::error::BridgeError;
use std::net::SocketAddr;

/// Configuration for one bridge node.
#[derive(Debug, Clone)]
pub struct Options {
    /// Node display name; must be unique across the cluster.
    /// Defaults to the host name plus a random suffix.
    pub name: String,

    /// Address the gossip socket binds to.
    pub bind_addr: String,

    /// Address advertised to peers (for NAT traversal). Must be reachable
    /// from the other nodes.
    pub advertise_addr: String,

    /// Port the replication RPC listener binds to. Advertised to peers as
    /// gossip metadata so they can compute the dial address.
    pub rpc_port: String,

    /// Seed peer gossip addresses to join on startup.
    pub seeds: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            bind_addr: "0.0.0.0:7933".to_string(),
            advertise_addr: "127.0.0.1:7933".to_string(),
            rpc_port: "8933".to_string(),
            seeds: Vec::new(),
        }
    }
}

impl Options {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the gossip bind address.
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the advertised gossip address.
    pub fn advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.advertise_addr = addr.into();
        self
    }

    /// Set the replication RPC port.
    pub fn rpc_port(mut self, port: impl Into<String>) -> Self {
        self.rpc_port = port.into();
        self
    }

    /// Set the seed peer list.
    pub fn seeds(mut self, seeds: Vec<String>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Validate the configuration. Malformed bind/advertise/seed addresses
    /// are fatal: the process must not serve with them.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.is_empty() {
            return Err(BridgeError::MissingName);
        }
        self.parse_bind()?;
        self.parse_advertise()?;
        self.parse_seeds()?;
        Ok(())
    }

    pub(crate) fn parse_bind(&self) -> Result<SocketAddr, BridgeError> {
        self.bind_addr
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(self.bind_addr.clone()))
    }

    pub(crate) fn parse_advertise(&self) -> Result<SocketAddr, BridgeError> {
        self.advertise_addr
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(self.advertise_addr.clone()))
    }

    pub(crate) fn parse_seeds(&self) -> Result<Vec<SocketAddr>, BridgeError> {
        self.seeds
            .iter()
            .map(|s| s.parse().map_err(|_| BridgeError::InvalidSeed(s.clone())))
            .collect()
    }
}

/// Host name plus a random suffix, so colliding defaults across a fleet
/// stay unlikely.
fn default_node_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "node".to_string());
    format!("{}-{:06x}", host, rand::random::<u32>() & 0xff_ffff)
}

/// Load options from `BRIDGE_*` environment variables. Used by the demo
/// binary; library users construct [`Options`] directly.
pub fn load_options() -> Options {
    let mut opts = Options::default();

    if let Ok(name) = std::env::var("BRIDGE_NODE_NAME") {
        if !name.is_empty() {
            opts.name = name;
        }
    }
    if let Ok(addr) = std::env::var("BRIDGE_BIND_ADDR") {
        if !addr.is_empty() {
            opts.bind_addr = addr;
        }
    }
    if let Ok(addr) = std::env::var("BRIDGE_ADVERTISE_ADDR") {
        if !addr.is_empty() {
            opts.advertise_addr = addr;
        }
    }
    if let Ok(port) = std::env::var("BRIDGE_RPC_PORT") {
        if !port.is_empty() {
            opts.rpc_port = port;
        }
    }
    if let Ok(seeds) = std::env::var("BRIDGE_SEEDS") {
        opts.seeds = seeds
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    opts
}
