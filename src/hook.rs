//! Host-broker hook
//!
//! The lifecycle surface the host broker drives: initialize with
//! configuration, forward locally observed client events into the bridge,
//! shut down. This is the only place host-broker callbacks touch the
//! cluster layer.

use crate::bridge::{Bridge, BridgeBuilder};
use crate::broker::Broker;
use crate::config::Options;
use crate::error::BridgeError;
use std::sync::Arc;

/// Identity the bridge publishes injected messages under. Publishes
/// observed from this client are replicated traffic being delivered, not
/// new local activity, and must not be pushed again.
pub const HOOK_ID: &str = "bridge-hook";

/// Bridges one host broker into the cluster.
pub struct BridgeHook {
    bridge: Arc<Bridge>,
}

impl BridgeHook {
    /// Build the bridge and start serving it in the background.
    pub fn init(options: Options, broker: Arc<dyn Broker>) -> Result<Self, BridgeError> {
        let bridge = BridgeBuilder::new(options).broker(broker).build()?;

        let serving = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = serving.serve().await {
                tracing::error!("bridge failed to serve: {}", e);
            }
        });

        Ok(Self { bridge })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// A client established a session on the local broker.
    pub async fn on_session_established(&self, client_id: &str) {
        tracing::info!("local client {} connected", client_id);
        self.bridge.push_connect(client_id).await;
    }

    /// A client published a message on the local broker. `client_id` is the
    /// publishing client; publishes made under the bridge's own injection
    /// identity are skipped, which is the structural loop guard.
    pub async fn on_publish(
        &self,
        client_id: &str,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) {
        if client_id == HOOK_ID {
            return;
        }
        self.bridge.push_publish(topic, payload, qos, retain).await;
    }

    /// A will message was issued for a disconnecting client. Replicated
    /// like any other local publish.
    pub async fn on_will_sent(&self, client_id: &str, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        self.on_publish(client_id, topic, payload, qos, retain).await;
    }

    /// A client disconnected from the local broker.
    pub async fn on_disconnect(&self, client_id: &str) {
        tracing::info!("local client {} disconnected", client_id);
        self.bridge.push_disconnect(client_id).await;
    }

    /// Gracefully shut the bridge down.
    pub async fn stop(&self) {
        self.bridge.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::discovery::{Discovery, DiscoveryHandler};
    use crate::transport::{Transport, TransportHandler};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        pushes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn set_handler(&self, _handler: Arc<dyn TransportHandler>) {}
        async fn join(&self, _agent: &Agent) {}
        async fn leave(&self, _agent: &Agent) {}
        async fn update(&self, _agent: &Agent) {}

        async fn push_connect(&self, _local: &Agent, client_id: &str) -> usize {
            self.pushes.lock().push(format!("connect:{}", client_id));
            0
        }

        async fn push_disconnect(&self, _local: &Agent, client_id: &str) -> usize {
            self.pushes.lock().push(format!("disconnect:{}", client_id));
            0
        }

        async fn push_publish(
            &self,
            _local: &Agent,
            topic: &str,
            _payload: &[u8],
            _qos: u8,
            _retain: bool,
        ) -> usize {
            self.pushes.lock().push(format!("publish:{}", topic));
            0
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    struct StaticDiscovery {
        local: Agent,
    }

    #[async_trait]
    impl Discovery for StaticDiscovery {
        fn set_handler(&self, _handler: Arc<dyn DiscoveryHandler>) {}

        fn agents(&self) -> Vec<Agent> {
            vec![self.local.clone()]
        }

        fn local_agent(&self) -> Option<Agent> {
            Some(self.local.clone())
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    struct NullBroker;

    impl Broker for NullBroker {
        fn lookup_live_client(&self, _client_id: &str) -> Option<Box<dyn crate::broker::Session>> {
            None
        }

        fn force_close_session(
            &self,
            _session: Box<dyn crate::broker::Session>,
            _reason: crate::broker::CloseReason,
        ) {
        }

        fn inject_publish(&self, _topic: &str, _payload: &[u8], _qos: u8, _retain: bool) {}
    }

    fn hook() -> (BridgeHook, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let bridge = BridgeBuilder::new(Options::new("local"))
            .broker(Arc::new(NullBroker))
            .discovery(Arc::new(StaticDiscovery {
                local: Agent::new("local", "127.0.0.1", 7933, "8933"),
            }))
            .transport(transport.clone())
            .build()
            .unwrap();
        (BridgeHook { bridge }, transport)
    }

    #[tokio::test]
    async fn test_local_events_are_pushed() {
        let (hook, transport) = hook();

        hook.on_session_established("c1").await;
        hook.on_publish("c1", "t/1", b"hi", 0, false).await;
        hook.on_disconnect("c1").await;

        assert_eq!(
            *transport.pushes.lock(),
            vec!["connect:c1", "publish:t/1", "disconnect:c1"]
        );
    }

    #[tokio::test]
    async fn test_own_injection_identity_is_not_rebroadcast() {
        let (hook, transport) = hook();

        hook.on_publish(HOOK_ID, "t/1", b"hi", 0, false).await;

        assert!(transport.pushes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_will_message_replicated_as_publish() {
        let (hook, transport) = hook();

        hook.on_will_sent("c1", "wills/c1", b"gone", 1, false).await;

        assert_eq!(*transport.pushes.lock(), vec!["publish:wills/c1"]);
    }
}
