//! Gossip membership
//!
//! SWIM-style membership over UDP: every message carries the sender's
//! identity, advertised gossip address, and its replication RPC port (the
//! metadata tag peers need to compute a dial address without a separate
//! discovery round-trip). A dedicated event loop runs for the lifetime of
//! the component, draining datagrams and timers.
//!
//! Message processing is Sans-IO: [`process_message`] and
//! [`sweep_failures`] mutate the table and return actions for the loop to
//! perform, which keeps the membership logic testable without sockets.

use crate::agent::Agent;
use crate::config::Options;
use crate::discovery::{Discovery, DiscoveryHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// How often a random live member is probed.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// How often the table is swept for silent members.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A member silent for longer than this is treated as failed.
const FAILURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Gossip wire messages. `addr` is always the sender's advertised gossip
/// address; `rpc_port` is the metadata tag carrying its RPC listen port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Liveness probe.
    Ping {
        id: String,
        addr: SocketAddr,
        rpc_port: String,
    },
    /// Probe response.
    Ack {
        id: String,
        addr: SocketAddr,
        rpc_port: String,
    },
    /// Announce joining; answered with the full member list.
    Join {
        id: String,
        addr: SocketAddr,
        rpc_port: String,
    },
    /// Member list snapshot: `(id, gossip addr, rpc port)` per member.
    Members {
        members: Vec<(String, SocketAddr, String)>,
    },
    /// Graceful departure.
    Leave { id: String },
}

impl GossipMessage {
    fn announce(local: &Agent) -> Option<(SocketAddr, String)> {
        local.gossip_addr().ok().map(|addr| (addr, local.rpc_port.clone()))
    }

    fn ping(local: &Agent) -> Option<Self> {
        Self::announce(local).map(|(addr, rpc_port)| GossipMessage::Ping {
            id: local.id.clone(),
            addr,
            rpc_port,
        })
    }

    fn ack(local: &Agent) -> Option<Self> {
        Self::announce(local).map(|(addr, rpc_port)| GossipMessage::Ack {
            id: local.id.clone(),
            addr,
            rpc_port,
        })
    }

    fn join(local: &Agent) -> Option<Self> {
        Self::announce(local).map(|(addr, rpc_port)| GossipMessage::Join {
            id: local.id.clone(),
            addr,
            rpc_port,
        })
    }
}

/// One membership table entry.
#[derive(Debug, Clone)]
pub struct Member {
    pub agent: Agent,
    pub last_seen: Instant,
}

impl Member {
    fn seen_now(agent: Agent) -> Self {
        Self {
            agent,
            last_seen: Instant::now(),
        }
    }
}

/// A change to report to the discovery handler.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipChange {
    Join(Agent),
    Update(Agent),
    Leave(Agent),
}

/// Output of message processing: either a datagram to send or a change to
/// report.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipAction {
    Send {
        to: SocketAddr,
        message: GossipMessage,
    },
    Notify(MembershipChange),
}

/// Insert or refresh a member, returning the change to report.
///
/// Join and update are filtered for the local node; the table itself always
/// receives the upsert, self included.
fn upsert_member(
    members: &RwLock<HashMap<String, Member>>,
    agent: Agent,
    local_id: &str,
) -> Option<MembershipChange> {
    let mut guard = members.write();

    let change = match guard.get(&agent.id) {
        None => (!agent.is_self(local_id)).then(|| MembershipChange::Join(agent.clone())),
        Some(existing) if existing.agent != agent => {
            (!agent.is_self(local_id)).then(|| MembershipChange::Update(agent.clone()))
        }
        Some(_) => None,
    };

    guard.insert(agent.id.clone(), Member::seen_now(agent));
    change
}

/// Process one inbound gossip message against the membership table.
pub fn process_message(
    msg: &GossipMessage,
    src: SocketAddr,
    members: &RwLock<HashMap<String, Member>>,
    local: &Agent,
) -> Vec<GossipAction> {
    let mut actions = Vec::new();

    match msg {
        GossipMessage::Ping { id, addr, rpc_port } => {
            let agent = Agent::from_gossip(id, *addr, rpc_port);
            if let Some(change) = upsert_member(members, agent, &local.id) {
                actions.push(GossipAction::Notify(change));
            }
            if let Some(ack) = GossipMessage::ack(local) {
                actions.push(GossipAction::Send { to: src, message: ack });
            }
        }

        GossipMessage::Ack { id, addr, rpc_port } => {
            let agent = Agent::from_gossip(id, *addr, rpc_port);
            if let Some(change) = upsert_member(members, agent, &local.id) {
                actions.push(GossipAction::Notify(change));
            }
        }

        GossipMessage::Join { id, addr, rpc_port } => {
            let agent = Agent::from_gossip(id, *addr, rpc_port);
            if let Some(change) = upsert_member(members, agent, &local.id) {
                actions.push(GossipAction::Notify(change));
            }

            // Answer with the full table so the joiner catches up in one hop.
            let snapshot: Vec<(String, SocketAddr, String)> = members
                .read()
                .values()
                .filter_map(|m| {
                    m.agent
                        .gossip_addr()
                        .ok()
                        .map(|addr| (m.agent.id.clone(), addr, m.agent.rpc_port.clone()))
                })
                .collect();
            actions.push(GossipAction::Send {
                to: src,
                message: GossipMessage::Members { members: snapshot },
            });
        }

        GossipMessage::Members { members: list } => {
            for (id, addr, rpc_port) in list {
                // A peer's view of this node may be stale; never let it
                // overwrite the local entry.
                if id == &local.id {
                    continue;
                }
                let agent = Agent::from_gossip(id, *addr, rpc_port);
                if let Some(change) = upsert_member(members, agent, &local.id) {
                    actions.push(GossipAction::Notify(change));
                }
            }
        }

        GossipMessage::Leave { id } => {
            // Uniform leave handling: any departing member is removed and
            // reported, not only the local node's own record.
            if id != &local.id {
                if let Some(member) = members.write().remove(id) {
                    actions.push(GossipAction::Notify(MembershipChange::Leave(member.agent)));
                }
            }
        }
    }

    actions
}

/// Remove members silent for longer than `timeout` and report each as a
/// leave. The local entry never expires.
pub fn sweep_failures(
    members: &RwLock<HashMap<String, Member>>,
    timeout: Duration,
    local_id: &str,
) -> Vec<GossipAction> {
    let now = Instant::now();
    let mut expired = Vec::new();

    {
        let mut guard = members.write();
        let dead: Vec<String> = guard
            .iter()
            .filter(|(id, m)| {
                id.as_str() != local_id && now.duration_since(m.last_seen) > timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            if let Some(member) = guard.remove(&id) {
                expired.push(member.agent);
            }
        }
    }

    expired
        .into_iter()
        .map(|agent| GossipAction::Notify(MembershipChange::Leave(agent)))
        .collect()
}

/// Pick a random remote member to probe.
pub fn select_probe_target(
    members: &RwLock<HashMap<String, Member>>,
    local_id: &str,
) -> Option<SocketAddr> {
    let addrs: Vec<SocketAddr> = members
        .read()
        .values()
        .filter(|m| !m.agent.is_self(local_id))
        .filter_map(|m| m.agent.gossip_addr().ok())
        .collect();

    if addrs.is_empty() {
        return None;
    }
    Some(addrs[rand::random::<usize>() % addrs.len()])
}

/// Gossip-backed [`Discovery`].
pub struct GossipDiscovery {
    options: Options,
    members: Arc<RwLock<HashMap<String, Member>>>,
    handler: Arc<RwLock<Option<Arc<dyn DiscoveryHandler>>>>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    shutdown: Arc<AtomicBool>,
}

impl GossipDiscovery {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            members: Arc::new(RwLock::new(HashMap::new())),
            handler: Arc::new(RwLock::new(None)),
            socket: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn execute_actions(
        actions: Vec<GossipAction>,
        socket: &UdpSocket,
        handler: &RwLock<Option<Arc<dyn DiscoveryHandler>>>,
    ) {
        for action in actions {
            match action {
                GossipAction::Send { to, message } => {
                    if let Ok(data) = bincode::serialize(&message) {
                        if let Err(e) = socket.send_to(&data, to).await {
                            tracing::debug!("gossip send to {} failed: {}", to, e);
                        }
                    }
                }
                GossipAction::Notify(change) => {
                    let handler = handler.read().clone();
                    let Some(handler) = handler else { continue };
                    match change {
                        MembershipChange::Join(agent) => {
                            tracing::info!("agent {} joined", agent);
                            handler.on_agent_join(agent).await;
                        }
                        MembershipChange::Update(agent) => {
                            tracing::info!("agent {} updated", agent);
                            handler.on_agent_update(agent).await;
                        }
                        MembershipChange::Leave(agent) => {
                            tracing::info!("agent {} left", agent);
                            handler.on_agent_leave(agent).await;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Discovery for GossipDiscovery {
    fn set_handler(&self, handler: Arc<dyn DiscoveryHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn agents(&self) -> Vec<Agent> {
        self.members.read().values().map(|m| m.agent.clone()).collect()
    }

    fn local_agent(&self) -> Option<Agent> {
        self.members
            .read()
            .get(&self.options.name)
            .map(|m| m.agent.clone())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let bind = self.options.parse_bind()?;
        let advertise = self.options.parse_advertise()?;
        let seeds = self.options.parse_seeds()?;

        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let bound = socket.local_addr()?;
        tracing::info!(
            "gossip started, bind={} advertise={} node={}",
            bound,
            advertise,
            self.options.name
        );

        let local = Agent::from_gossip(&self.options.name, advertise, &self.options.rpc_port);
        self.members
            .write()
            .insert(local.id.clone(), Member::seen_now(local.clone()));
        *self.socket.write() = Some(socket.clone());

        // Announce to the seed list before the loop starts probing.
        if let Some(join) = GossipMessage::join(&local) {
            if let Ok(data) = bincode::serialize(&join) {
                for seed in &seeds {
                    if let Err(e) = socket.send_to(&data, seed).await {
                        tracing::warn!("join to seed {} failed: {}", seed, e);
                    }
                }
            }
        }

        let members = self.members.clone();
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            let mut probe_timer = tokio::time::interval(PROBE_INTERVAL);
            let mut sweep_timer = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                if shutdown.load(Ordering::SeqCst) {
                    tracing::info!("gossip event loop stopping");
                    break;
                }

                tokio::select! {
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, src)) => {
                            if let Ok(msg) = bincode::deserialize::<GossipMessage>(&buf[..len]) {
                                let actions = process_message(&msg, src, &members, &local);
                                Self::execute_actions(actions, &socket, &handler).await;
                            }
                        }
                        Err(e) => {
                            tracing::error!("gossip recv error: {}", e);
                        }
                    },

                    _ = probe_timer.tick() => {
                        if let Some(target) = select_probe_target(&members, &local.id) {
                            if let Some(ping) = GossipMessage::ping(&local) {
                                if let Ok(data) = bincode::serialize(&ping) {
                                    let _ = socket.send_to(&data, target).await;
                                }
                            }
                        }
                    }

                    _ = sweep_timer.tick() => {
                        let actions = sweep_failures(&members, FAILURE_TIMEOUT, &local.id);
                        Self::execute_actions(actions, &socket, &handler).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Graceful leave: tell every known remote member before going dark.
        let socket = self.socket.read().clone();
        let Some(socket) = socket else { return };

        let targets: Vec<SocketAddr> = {
            self.members
                .read()
                .values()
                .filter(|m| !m.agent.is_self(&self.options.name))
                .filter_map(|m| m.agent.gossip_addr().ok())
                .collect()
        };

        let leave = GossipMessage::Leave {
            id: self.options.name.clone(),
        };
        if let Ok(data) = bincode::serialize(&leave) {
            for target in targets {
                let _ = socket.send_to(&data, target).await;
            }
        }
        tracing::info!("gossip stopped, node={}", self.options.name);
    }
}
