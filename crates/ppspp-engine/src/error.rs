//! Engine error kinds.

use ppspp_core::{PeerId, SwarmId, WireError};

use crate::channel::ProtocolState;
use crate::transport::TransportError;

/// Errors returned by engine operations.
///
/// Local operations return these to the caller. While processing inbound
/// datagrams they are only logged; the datagram (or message) is dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("a live channel for swarm {swarm} with {remote} already exists")]
    DuplicateChannel { swarm: SwarmId, remote: PeerId },

    #[error("no live channel")]
    UnknownChannel,

    #[error("swarm {0} has not been added")]
    UnknownSwarm(SwarmId),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] WireError),

    #[error("{what} is not valid while the channel is {state}")]
    PrematureMessage {
        state: ProtocolState,
        what: &'static str,
    },

    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),

    #[error("not connected to {0}")]
    NotConnected(PeerId),

    #[error("closing handshake with {remote} on swarm {swarm} got no reply")]
    Timeout { swarm: SwarmId, remote: PeerId },

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected(peer) => ProtocolError::NotConnected(peer),
            other => ProtocolError::Transport(other),
        }
    }
}
