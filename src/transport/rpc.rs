//! QUIC replication transport
//!
//! One outbound QUIC connection per known remote agent, opened lazily on the
//! first join/update notification and closed exactly once on leave. Every
//! push is a unary call: open a bidirectional stream, write one envelope
//! frame, read one response frame. The endpoint doubles as the server side,
//! dispatching inbound calls to the configured handler.
//!
//! Peers authenticate nothing: each node presents a self-signed certificate
//! and clients skip verification, matching the insecure channel of the
//! replication protocol.

use crate::agent::Agent;
use crate::transport::wire::{
    decode_body, decode_header, encode_frame, Envelope, Response, FRAME_HEADER_BYTES,
};
use crate::transport::{Transport, TransportHandler};
use async_trait::async_trait;
use quinn::{ClientConfig, Connection as QuinnConnection, Endpoint, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Deadline for each outbound unary call and for dial handshakes.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled connection to one remote agent.
pub struct PeerConnection {
    pub agent_id: String,
    pub addr: SocketAddr,
    connection: QuinnConnection,
}

impl PeerConnection {
    /// Issue one unary call: write an envelope, read the response.
    async fn request(&self, env: &Envelope) -> anyhow::Result<Response> {
        let (mut send, mut recv) = self.connection.open_bi().await?;

        let frame = encode_frame(env)?;
        send.write_all(&frame).await?;
        send.finish()?;

        let mut header = [0u8; FRAME_HEADER_BYTES];
        recv.read_exact(&mut header).await?;
        let (len, crc) = decode_header(&header)?;

        let mut body = vec![0u8; len];
        recv.read_exact(&mut body).await?;
        decode_body(&body, crc)
    }

    fn close(&self) {
        self.connection.close(0u32.into(), b"leave");
    }
}

/// QUIC-based [`Transport`].
pub struct RpcTransport {
    node_id: String,
    rpc_port: String,
    endpoint: RwLock<Option<Endpoint>>,
    pool: Arc<RwLock<HashMap<String, Arc<PeerConnection>>>>,
    handler: Arc<parking_lot::RwLock<Option<Arc<dyn TransportHandler>>>>,
}

impl RpcTransport {
    /// Create a transport that will listen on `rpc_port`. `node_id` is used
    /// as the certificate subject and dial server name.
    pub fn new(node_id: impl Into<String>, rpc_port: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            rpc_port: rpc_port.into(),
            endpoint: RwLock::new(None),
            pool: Arc::new(RwLock::new(HashMap::new())),
            handler: Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    /// Ids of the agents with a pooled connection. Test and observability
    /// surface; the pool itself stays private.
    pub async fn pooled_ids(&self) -> Vec<String> {
        self.pool.read().await.keys().cloned().collect()
    }

    /// Address the RPC listener is actually bound to.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let guard = self.endpoint.read().await;
        guard.as_ref().and_then(|ep| ep.local_addr().ok())
    }

    /// Dial `agent` and pool the connection unless one already exists.
    /// A dial failure is logged and abandoned; the agent is re-dialed only
    /// on its next distinct join/update notification.
    async fn ensure_peer(&self, agent: &Agent, cause: &'static str) {
        if self.pool.read().await.contains_key(&agent.id) {
            return;
        }

        let addr = match agent.rpc_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!("agent {} {}: bad rpc address {:?}: {}", agent.id, cause, agent.rpc_port, e);
                return;
            }
        };

        let endpoint = match self.endpoint.read().await.clone() {
            Some(ep) => ep,
            None => {
                tracing::error!("agent {} {}: transport not started", agent.id, cause);
                return;
            }
        };

        tracing::info!("agent {} {}, dialing {}", agent.id, cause, addr);

        let connecting = match endpoint.connect(addr, &agent.id) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("agent {} {}: dial {} failed: {}", agent.id, cause, addr, e);
                return;
            }
        };

        match tokio::time::timeout(CALL_TIMEOUT, connecting).await {
            Ok(Ok(connection)) => {
                let peer = Arc::new(PeerConnection {
                    agent_id: agent.id.clone(),
                    addr,
                    connection,
                });
                self.pool.write().await.insert(agent.id.clone(), peer);
            }
            Ok(Err(e)) => {
                tracing::error!("agent {} {}: handshake with {} failed: {}", agent.id, cause, addr, e);
            }
            Err(_) => {
                tracing::error!("agent {} {}: handshake with {} timed out", agent.id, cause, addr);
            }
        }
    }

    /// Broadcast one envelope to every pooled peer except the local agent.
    /// Sequential fan-out; each call carries its own deadline; failures are
    /// logged and skipped, never retried.
    async fn broadcast(&self, local: &Agent, env: Envelope) -> usize {
        let peers: Vec<Arc<PeerConnection>> = self
            .pool
            .read()
            .await
            .iter()
            .filter(|(id, _)| !local.is_self(id))
            .map(|(_, peer)| peer.clone())
            .collect();

        let mut sent = 0;
        for peer in peers {
            match tokio::time::timeout(CALL_TIMEOUT, peer.request(&env)).await {
                Ok(Ok(resp)) if resp.is_success() => sent += 1,
                Ok(Ok(resp)) => {
                    tracing::warn!(
                        "push {} to agent {} rejected: code={} {}",
                        env.kind(),
                        peer.agent_id,
                        resp.code,
                        resp.message
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!("push {} to agent {} failed: {}", env.kind(), peer.agent_id, e);
                }
                Err(_) => {
                    tracing::error!("push {} to agent {} timed out", env.kind(), peer.agent_id);
                }
            }
        }
        sent
    }

    /// Handle one inbound unary call: decode the envelope, forward it
    /// verbatim to the handler, reply with a trivial success.
    async fn serve_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: Option<Arc<dyn TransportHandler>>,
    ) -> anyhow::Result<()> {
        let mut header = [0u8; FRAME_HEADER_BYTES];
        recv.read_exact(&mut header).await?;
        let (len, crc) = decode_header(&header)?;

        let mut body = vec![0u8; len];
        recv.read_exact(&mut body).await?;
        let env: Envelope = decode_body(&body, crc)?;

        if let Some(handler) = handler {
            match &env {
                Envelope::Connect { agent_id, client_id } => {
                    handler.on_connect(agent_id, client_id).await;
                }
                Envelope::Disconnect { agent_id, client_id } => {
                    handler.on_disconnect(agent_id, client_id).await;
                }
                Envelope::Publish {
                    agent_id,
                    topic,
                    payload,
                    qos,
                    retain,
                } => {
                    handler.on_publish(agent_id, topic, payload, *qos, *retain).await;
                }
            }
        }

        let frame = encode_frame(&Response::success())?;
        send.write_all(&frame).await?;
        send.finish()?;
        Ok(())
    }

    async fn serve_connection(
        conn: QuinnConnection,
        handler: Arc<parking_lot::RwLock<Option<Arc<dyn TransportHandler>>>>,
    ) {
        loop {
            match conn.accept_bi().await {
                Ok((send, recv)) => {
                    let handler = handler.read().clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::serve_stream(send, recv, handler).await {
                            tracing::debug!("inbound call failed: {}", e);
                        }
                    });
                }
                Err(quinn::ConnectionError::ApplicationClosed(_)) => break,
                Err(e) => {
                    tracing::debug!("connection closed: {}", e);
                    break;
                }
            }
        }
    }

    fn build_endpoint(&self, bind: SocketAddr) -> anyhow::Result<Endpoint> {
        // Self-signed certificate; peers skip verification.
        let cert = rcgen::generate_simple_self_signed(vec![
            self.node_id.clone(),
            "localhost".to_string(),
        ])?;

        let cert_chain = vec![rustls::pki_types::CertificateDer::from(cert.cert.der().to_vec())];
        let private_key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .map_err(|e| anyhow::anyhow!("failed to parse private key: {:?}", e))?;

        let server_crypto = quinn::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)?;
        let server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)?,
        ));

        let client_crypto = quinn::rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth();
        let client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)?,
        ));

        let mut endpoint = Endpoint::server(server_config, bind)?;
        endpoint.set_default_client_config(client_config);
        Ok(endpoint)
    }
}

#[async_trait]
impl Transport for RpcTransport {
    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn join(&self, agent: &Agent) {
        self.ensure_peer(agent, "joined").await;
    }

    async fn update(&self, agent: &Agent) {
        self.ensure_peer(agent, "updated").await;
    }

    async fn leave(&self, agent: &Agent) {
        if let Some(peer) = self.pool.write().await.remove(&agent.id) {
            tracing::info!("agent {} left, closing {}", agent.id, peer.addr);
            peer.close();
        }
    }

    async fn push_connect(&self, local: &Agent, client_id: &str) -> usize {
        self.broadcast(
            local,
            Envelope::Connect {
                agent_id: local.id.clone(),
                client_id: client_id.to_string(),
            },
        )
        .await
    }

    async fn push_disconnect(&self, local: &Agent, client_id: &str) -> usize {
        self.broadcast(
            local,
            Envelope::Disconnect {
                agent_id: local.id.clone(),
                client_id: client_id.to_string(),
            },
        )
        .await
    }

    async fn push_publish(
        &self,
        local: &Agent,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> usize {
        self.broadcast(
            local,
            Envelope::Publish {
                agent_id: local.id.clone(),
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
            },
        )
        .await
    }

    async fn start(&self) -> anyhow::Result<()> {
        let port: u16 = self
            .rpc_port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid rpc port {:?}", self.rpc_port))?;
        let bind: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();

        let endpoint = self.build_endpoint(bind)?;
        tracing::info!("rpc transport listening on {}", endpoint.local_addr()?);

        let accept_endpoint = endpoint.clone();
        *self.endpoint.write().await = Some(endpoint);

        let handler = self.handler.clone();
        tokio::spawn(async move {
            while let Some(incoming) = accept_endpoint.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    match incoming.await {
                        Ok(conn) => Self::serve_connection(conn, handler).await,
                        Err(e) => tracing::warn!("failed to accept connection: {}", e),
                    }
                });
            }
        });

        Ok(())
    }

    async fn stop(&self) {
        for (_, peer) in self.pool.write().await.drain() {
            peer.close();
        }
        if let Some(endpoint) = self.endpoint.write().await.take() {
            endpoint.close(0u32.into(), b"shutdown");
        }
    }
}

/// Accept any server certificate; cluster peers are self-signed and
/// unauthenticated at this layer.
#[derive(Debug)]
struct SkipServerVerification;

impl quinn::rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<quinn::rustls::client::danger::ServerCertVerified, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<quinn::rustls::SignatureScheme> {
        vec![
            quinn::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            quinn::rustls::SignatureScheme::RSA_PKCS1_SHA384,
            quinn::rustls::SignatureScheme::RSA_PKCS1_SHA512,
            quinn::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            quinn::rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            quinn::rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            quinn::rustls::SignatureScheme::RSA_PSS_SHA256,
            quinn::rustls::SignatureScheme::RSA_PSS_SHA384,
            quinn::rustls::SignatureScheme::RSA_PSS_SHA512,
            quinn::rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_empty_initially() {
        let transport = RpcTransport::new("n1", "0");
        assert!(transport.pooled_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_addr_before_start() {
        let transport = RpcTransport::new("n1", "0");
        assert!(transport.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_port() {
        let transport = RpcTransport::new("n1", "not-a-port");
        assert!(transport.start().await.is_err());
    }

    #[tokio::test]
    async fn test_leave_without_connection_is_noop() {
        let transport = RpcTransport::new("n1", "0");
        let agent = Agent::new("n2", "127.0.0.1", 7933, "8933");
        transport.leave(&agent).await;
        assert!(transport.pooled_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_with_zero_value_rpc_port_is_abandoned() {
        let transport = RpcTransport::new("n1", "0");
        let agent = Agent::new("n2", "127.0.0.1", 7933, "");
        transport.join(&agent).await;
        assert!(transport.pooled_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_empty_pool() {
        let transport = RpcTransport::new("n1", "0");
        let local = Agent::new("n1", "127.0.0.1", 7933, "8933");
        assert_eq!(transport.push_connect(&local, "c1").await, 0);
        assert_eq!(transport.push_disconnect(&local, "c1").await, 0);
        assert_eq!(transport.push_publish(&local, "t", b"x", 0, false).await, 0);
    }
}
