//! Integration tests for the replication transport
//!
//! Spins up real QUIC endpoints on ephemeral ports and pushes envelopes
//! between them.

use mqtt_bridge::{Agent, RpcTransport, Transport, TransportHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

fn init_crypto() {
    INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("failed to install crypto provider");
    });
}

#[derive(Default)]
struct RecordingHandler {
    connects: Mutex<Vec<(String, String)>>,
    disconnects: Mutex<Vec<(String, String)>>,
    publishes: Mutex<Vec<(String, String, Vec<u8>, u8, bool)>>,
}

#[async_trait]
impl TransportHandler for RecordingHandler {
    async fn on_connect(&self, agent_id: &str, client_id: &str) {
        self.connects
            .lock()
            .push((agent_id.to_string(), client_id.to_string()));
    }

    async fn on_disconnect(&self, agent_id: &str, client_id: &str) {
        self.disconnects
            .lock()
            .push((agent_id.to_string(), client_id.to_string()));
    }

    async fn on_publish(&self, agent_id: &str, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        self.publishes.lock().push((
            agent_id.to_string(),
            topic.to_string(),
            payload.to_vec(),
            qos,
            retain,
        ));
    }
}

/// Start a transport on an ephemeral port and return it together with
/// the agent record peers would learn from gossip.
async fn started_node(id: &str) -> (Arc<RpcTransport>, Agent) {
    let transport = Arc::new(RpcTransport::new(id, "0"));
    transport.start().await.unwrap();
    let port = transport.local_addr().await.unwrap().port();
    let agent = Agent::new(id, "127.0.0.1", 7933, port.to_string());
    (transport, agent)
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// A pushed publish arrives at the peer with every field intact.
#[tokio::test]
async fn test_push_publish_delivers_all_fields() {
    init_crypto();

    let (node_a, agent_a) = started_node("node-a").await;
    let (node_b, agent_b) = started_node("node-b").await;

    let handler = Arc::new(RecordingHandler::default());
    node_b.set_handler(handler.clone());

    node_a.join(&agent_b).await;
    assert_eq!(node_a.pooled_ids().await, vec!["node-b".to_string()]);

    let delivered = node_a
        .push_publish(&agent_a, "sensors/temp", &[1, 2, 3], 1, false)
        .await;
    assert_eq!(delivered, 1);

    assert!(wait_until(|| !handler.publishes.lock().is_empty()).await);
    let got = handler.publishes.lock()[0].clone();
    assert_eq!(
        got,
        (
            "node-a".to_string(),
            "sensors/temp".to_string(),
            vec![1, 2, 3],
            1,
            false
        )
    );

    node_a.stop().await;
    node_b.stop().await;
}

/// Connect and disconnect envelopes carry the origin agent and client id.
#[tokio::test]
async fn test_push_connect_and_disconnect() {
    init_crypto();

    let (node_a, agent_a) = started_node("origin").await;
    let (node_b, agent_b) = started_node("receiver").await;

    let handler = Arc::new(RecordingHandler::default());
    node_b.set_handler(handler.clone());
    node_a.join(&agent_b).await;

    assert_eq!(node_a.push_connect(&agent_a, "client-1").await, 1);
    assert_eq!(node_a.push_disconnect(&agent_a, "client-1").await, 1);

    assert!(wait_until(|| !handler.disconnects.lock().is_empty()).await);
    assert_eq!(
        handler.connects.lock()[0],
        ("origin".to_string(), "client-1".to_string())
    );
    assert_eq!(
        handler.disconnects.lock()[0],
        ("origin".to_string(), "client-1".to_string())
    );

    node_a.stop().await;
    node_b.stop().await;
}

/// Joining the same agent twice keeps a single pooled connection.
#[tokio::test]
async fn test_join_is_idempotent() {
    init_crypto();

    let (node_a, _) = started_node("idem-a").await;
    let (node_b, agent_b) = started_node("idem-b").await;

    node_a.join(&agent_b).await;
    node_a.join(&agent_b).await;
    node_a.update(&agent_b).await;

    assert_eq!(node_a.pooled_ids().await.len(), 1);

    node_a.stop().await;
    node_b.stop().await;
}

/// A pool entry for the local node itself is never pushed to.
#[tokio::test]
async fn test_broadcast_excludes_self() {
    init_crypto();

    let (node_a, agent_a) = started_node("self-a").await;

    let handler = Arc::new(RecordingHandler::default());
    node_a.set_handler(handler.clone());

    // A stale membership event can hand a node its own record.
    node_a.join(&agent_a).await;
    assert_eq!(node_a.pooled_ids().await, vec!["self-a".to_string()]);

    let delivered = node_a.push_connect(&agent_a, "client-1").await;
    assert_eq!(delivered, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handler.connects.lock().is_empty());

    node_a.stop().await;
}

/// After a leave the departed peer is skipped without error.
#[tokio::test]
async fn test_leave_removes_peer_from_fanout() {
    init_crypto();

    let (node_a, agent_a) = started_node("fan-a").await;
    let (node_b, agent_b) = started_node("fan-b").await;
    let (node_c, agent_c) = started_node("fan-c").await;

    let handler_b = Arc::new(RecordingHandler::default());
    let handler_c = Arc::new(RecordingHandler::default());
    node_b.set_handler(handler_b.clone());
    node_c.set_handler(handler_c.clone());

    node_a.join(&agent_b).await;
    node_a.join(&agent_c).await;
    assert_eq!(node_a.pooled_ids().await.len(), 2);

    node_a.leave(&agent_b).await;
    assert_eq!(node_a.pooled_ids().await, vec!["fan-c".to_string()]);

    assert_eq!(node_a.push_connect(&agent_a, "client-9").await, 1);
    assert!(wait_until(|| !handler_c.connects.lock().is_empty()).await);
    assert!(handler_b.connects.lock().is_empty());

    node_a.stop().await;
    node_b.stop().await;
    node_c.stop().await;
}

/// An unreachable peer is logged and skipped; the rest still receive.
#[tokio::test]
async fn test_fanout_survives_dead_peer() {
    init_crypto();

    let (node_a, agent_a) = started_node("live-a").await;
    let (node_b, agent_b) = started_node("live-b").await;
    let (node_c, agent_c) = started_node("doomed").await;

    let handler_b = Arc::new(RecordingHandler::default());
    node_b.set_handler(handler_b.clone());

    node_a.join(&agent_b).await;
    node_a.join(&agent_c).await;

    // Kill node-c after its connection is pooled.
    node_c.stop().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = node_a.push_publish(&agent_a, "t", b"x", 0, false).await;
    assert_eq!(delivered, 1);
    assert!(wait_until(|| !handler_b.publishes.lock().is_empty()).await);

    node_a.stop().await;
    node_b.stop().await;
}

/// Joining an agent with no usable rpc port is abandoned, not fatal.
#[tokio::test]
async fn test_join_with_empty_rpc_port_is_abandoned() {
    init_crypto();

    let (node_a, _) = started_node("strict").await;
    let bad = Agent::new("broken", "127.0.0.1", 7933, "");

    node_a.join(&bad).await;
    assert!(node_a.pooled_ids().await.is_empty());

    node_a.stop().await;
}
