//! Demo bridge node
//!
//! Runs one cluster node with a stub broker that only logs what the bridge
//! applies to it. Real deployments implement [`mqtt_bridge::Broker`] over
//! their broker engine and drive the [`mqtt_bridge::BridgeHook`] lifecycle
//! from its plugin callbacks.

use mqtt_bridge::{load_options, Broker, BridgeHook, CloseReason, Session};
use std::sync::Arc;

/// Broker stub: no sessions, publishes are logged and dropped.
struct LogBroker;

impl Broker for LogBroker {
    fn lookup_live_client(&self, _client_id: &str) -> Option<Box<dyn Session>> {
        None
    }

    fn force_close_session(&self, session: Box<dyn Session>, reason: CloseReason) {
        tracing::info!("closing session {}: {}", session.client_id(), reason);
    }

    fn inject_publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool) {
        tracing::info!(
            "injected publish topic={} bytes={} qos={} retain={}",
            topic,
            payload.len(),
            qos,
            retain
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let options = load_options();
    tracing::info!(
        "starting bridge node name={} bind={} advertise={} rpc_port={} seeds={:?}",
        options.name,
        options.bind_addr,
        options.advertise_addr,
        options.rpc_port,
        options.seeds
    );

    let hook = BridgeHook::init(options, Arc::new(LogBroker))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    hook.stop().await;
    Ok(())
}
