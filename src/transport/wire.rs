//! Wire format for replicated events
//!
//! Envelopes are bincode-encoded and framed as
//! `[len: u32 BE][crc32: u32 BE][body]`. The checksum covers the body.
//! Encoding and decoding are pure functions so they can be tested without
//! sockets.

use serde::{Deserialize, Serialize};

/// Frames larger than this are rejected before the body is read.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Size of the `[len][crc32]` frame header.
pub const FRAME_HEADER_BYTES: usize = 8;

/// A replicated client event, carried over the RPC boundary.
///
/// `agent_id` is always the sender's own agent id; there is no multi-hop
/// relaying, every node broadcasts directly to every other known node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// A client established a session on the origin node.
    Connect { agent_id: String, client_id: String },
    /// A client disconnected from the origin node.
    Disconnect { agent_id: String, client_id: String },
    /// A client published a message on the origin node.
    Publish {
        agent_id: String,
        topic: String,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    },
}

impl Envelope {
    /// Id of the node that originated this event.
    pub fn agent_id(&self) -> &str {
        match self {
            Envelope::Connect { agent_id, .. }
            | Envelope::Disconnect { agent_id, .. }
            | Envelope::Publish { agent_id, .. } => agent_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connect { .. } => "connect",
            Envelope::Disconnect { .. } => "disconnect",
            Envelope::Publish { .. } => "publish",
        }
    }
}

/// Reply to every unary call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: i32,
    pub message: String,
}

impl Response {
    pub fn success() -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Encode a value into a length-prefixed, checksummed frame.
pub fn encode_frame<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let body = bincode::serialize(value)?;
    if body.len() > MAX_FRAME_BYTES {
        anyhow::bail!("frame too large: {} bytes", body.len());
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a frame header, returning the body length and expected checksum.
pub fn decode_header(header: &[u8; FRAME_HEADER_BYTES]) -> anyhow::Result<(usize, u32)> {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_FRAME_BYTES {
        anyhow::bail!("frame too large: {} bytes", len);
    }
    Ok((len, crc))
}

/// Decode a frame body previously announced by [`decode_header`].
pub fn decode_body<T: for<'de> Deserialize<'de>>(body: &[u8], crc: u32) -> anyhow::Result<T> {
    if crc32fast::hash(body) != crc {
        anyhow::bail!("frame checksum mismatch");
    }
    Ok(bincode::deserialize(body)?)
}
