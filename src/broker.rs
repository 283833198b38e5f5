//! Host-broker collaborator contract
//!
//! The bridge never touches the message-broker engine directly; everything
//! it needs from the host broker goes through this narrow surface: look up
//! a live session, force one closed, inject a replicated publish.

/// Why a session is being force-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Another node reported a new connection with the same client id;
    /// the cluster allows at most one live session per id, last connect wins.
    SessionTakenOver,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::SessionTakenOver => write!(f, "session taken over"),
        }
    }
}

/// Opaque handle to one live client session inside the host broker.
pub trait Session: Send {
    fn client_id(&self) -> &str;
}

/// Minimum surface the host broker must expose to the bridge.
pub trait Broker: Send + Sync {
    /// Look up the live session for `client_id`, if any.
    fn lookup_live_client(&self, client_id: &str) -> Option<Box<dyn Session>>;

    /// Forcibly close a session previously returned by
    /// [`lookup_live_client`](Broker::lookup_live_client).
    fn force_close_session(&self, session: Box<dyn Session>, reason: CloseReason);

    /// Inject a message into the broker as if published by an internal
    /// system client. The delivery path must not be observed as a new
    /// local publish, or replicated messages would loop.
    fn inject_publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool);
}
