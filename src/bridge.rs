//! Bridge orchestrator
//!
//! Owns one membership provider and one replication transport, wiring
//! membership notifications to the transport's connection pool, local
//! broker events to outbound broadcast, and inbound replicated events to
//! the local broker.

use crate::agent::Agent;
use crate::broker::{Broker, CloseReason};
use crate::config::Options;
use crate::discovery::{Discovery, DiscoveryHandler, GossipDiscovery};
use crate::error::BridgeError;
use crate::transport::{RpcTransport, Transport, TransportHandler};
use async_trait::async_trait;
use std::sync::Arc;

/// Cluster bridge for one broker node.
pub struct Bridge {
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    broker: Option<Arc<dyn Broker>>,
}

/// Builds a [`Bridge`] and wires it as the handler of both backends.
///
/// Discovery and transport default to the gossip and QUIC implementations;
/// either can be substituted, which is how the orchestrator is tested.
pub struct BridgeBuilder {
    options: Options,
    broker: Option<Arc<dyn Broker>>,
    discovery: Option<Arc<dyn Discovery>>,
    transport: Option<Arc<dyn Transport>>,
}

impl BridgeBuilder {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            broker: None,
            discovery: None,
            transport: None,
        }
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Arc<Bridge>, BridgeError> {
        self.options.validate()?;

        let discovery = self
            .discovery
            .unwrap_or_else(|| Arc::new(GossipDiscovery::new(self.options.clone())));
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(RpcTransport::new(&self.options.name, &self.options.rpc_port))
        });

        let bridge = Arc::new(Bridge {
            discovery,
            transport,
            broker: self.broker,
        });
        bridge.discovery.set_handler(bridge.clone());
        bridge.transport.set_handler(bridge.clone());
        Ok(bridge)
    }
}

impl Bridge {
    /// Start the RPC listener first, then membership: peers learned from
    /// the first gossip exchange must find the endpoint ready to dial from.
    /// Fails fast without a broker collaborator or on any startup error.
    pub async fn serve(&self) -> anyhow::Result<()> {
        if self.broker.is_none() {
            return Err(BridgeError::InvalidBroker.into());
        }
        self.transport.start().await?;
        self.discovery.start().await?;
        Ok(())
    }

    /// Leave the membership protocol, then close the transport and its
    /// pooled connections.
    pub async fn stop(&self) {
        self.discovery.stop().await;
        self.transport.stop().await;
    }

    /// Snapshot of the known cluster members.
    pub fn agents(&self) -> Vec<Agent> {
        self.discovery.agents()
    }

    /// This node's own membership entry, once announced.
    pub fn local_agent(&self) -> Option<Agent> {
        self.discovery.local_agent()
    }

    /// Replicate a local session establishment to all peers.
    pub async fn push_connect(&self, client_id: &str) {
        let Some(local) = self.discovery.local_agent() else {
            tracing::debug!("not yet announced, dropping connect push for {}", client_id);
            return;
        };
        self.transport.push_connect(&local, client_id).await;
    }

    /// Replicate a local disconnect to all peers.
    pub async fn push_disconnect(&self, client_id: &str) {
        let Some(local) = self.discovery.local_agent() else {
            tracing::debug!("not yet announced, dropping disconnect push for {}", client_id);
            return;
        };
        self.transport.push_disconnect(&local, client_id).await;
    }

    /// Replicate a local publish to all peers.
    pub async fn push_publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        let Some(local) = self.discovery.local_agent() else {
            tracing::debug!("not yet announced, dropping publish push for {}", topic);
            return;
        };
        self.transport
            .push_publish(&local, topic, payload, qos, retain)
            .await;
    }
}

#[async_trait]
impl DiscoveryHandler for Bridge {
    async fn on_agent_join(&self, agent: Agent) {
        self.transport.join(&agent).await;
    }

    async fn on_agent_leave(&self, agent: Agent) {
        self.transport.leave(&agent).await;
    }

    async fn on_agent_update(&self, agent: Agent) {
        self.transport.update(&agent).await;
    }
}

#[async_trait]
impl TransportHandler for Bridge {
    async fn on_connect(&self, agent_id: &str, client_id: &str) {
        tracing::info!("client {} connected on agent {}", client_id, agent_id);
        let Some(broker) = &self.broker else { return };

        // At most one live session per client id across the cluster;
        // the newest connect wins.
        if let Some(session) = broker.lookup_live_client(client_id) {
            broker.force_close_session(session, CloseReason::SessionTakenOver);
        }
    }

    async fn on_disconnect(&self, agent_id: &str, client_id: &str) {
        tracing::info!("client {} disconnected on agent {}", client_id, agent_id);
    }

    async fn on_publish(&self, agent_id: &str, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        tracing::debug!("replicated publish from agent {} topic={}", agent_id, topic);
        let Some(broker) = &self.broker else { return };

        // Injected messages are delivered through a path the hook does not
        // observe as a local publish, so they are never re-broadcast.
        broker.inject_publish(topic, payload, qos, retain);
    }
}
