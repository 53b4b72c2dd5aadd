//! Protocol identifiers and message types.
//!
//! These are the in-memory forms; see the `wire` module for the byte layout.

use std::fmt;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Opaque, transport-assigned peer identity.
///
/// The engine only compares identities for equality. Each transport decides
/// what the string holds (an address, a key fingerprint, a test name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Content swarm (stream) identifier, assigned by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwarmId(pub u64);

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a chunk within a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locally scoped channel identifier.
///
/// Chosen by the peer that owns the channel. `ChannelId::ZERO` never names a
/// channel: a datagram addressed to it asks the receiver to establish one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub const ZERO: ChannelId = ChannelId(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A single protocol message. A datagram carries an ordered sequence of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Chunk availability: the sender holds chunks `[start, end)`.
    Have { start: ChunkId, end: ChunkId },

    /// Opens a channel for `swarm`. Travels on channel 0 and carries the
    /// initiator's own identifier for the new channel.
    HandshakeRequest { swarm: SwarmId, channel: ChannelId },

    /// Accepts a request. Addressed to the initiator's channel and carries
    /// the responder's identifier for the same channel.
    HandshakeAck { channel: ChannelId },

    /// Tears the channel down. No reply is expected.
    Close,
}

impl Msg {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Have { .. } => "have",
            Msg::HandshakeRequest { .. } => "handshake-request",
            Msg::HandshakeAck { .. } => "handshake-ack",
            Msg::Close => "close",
        }
    }
}

/// One transport delivery unit: messages for a single channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Receiver's identifier for the channel, or zero for a handshake request.
    pub channel: ChannelId,
    pub messages: Vec<Msg>,
}

impl Datagram {
    pub fn new(channel: ChannelId, messages: Vec<Msg>) -> Self {
        Self { channel, messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_channel_is_reserved() {
        assert!(ChannelId::ZERO.is_zero());
        assert!(!ChannelId(1).is_zero());
    }

    #[test]
    fn peer_id_compares_by_value() {
        let a = PeerId::new("udp/127.0.0.1:7000");
        let b = PeerId::from("udp/127.0.0.1:7000");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "udp/127.0.0.1:7000");
        assert_ne!(a, PeerId::new("udp/127.0.0.1:7001"));
    }

    #[test]
    fn message_kinds() {
        assert_eq!(Msg::Close.kind(), "close");
        assert_eq!(
            Msg::HandshakeAck { channel: ChannelId(3) }.kind(),
            "handshake-ack"
        );
    }
}
