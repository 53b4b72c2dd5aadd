//! Engine capability as seen by [`crate::Peer`].

use ppspp_core::{Datagram, PeerId, SwarmId};

use crate::channel::ProtocolState;
use crate::error::ProtocolError;

/// The operations a peer needs from a channel engine.
///
/// [`crate::Protocol`] is the production implementation; [`crate::StubEngine`]
/// only records what it is handed.
pub trait ChannelEngine: Send + Sync {
    fn add_swarm(&self, swarm: SwarmId);

    fn start_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError>;

    fn send_closing_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError>;

    fn protocol_state(&self, swarm: SwarmId, remote: &PeerId) -> Result<ProtocolState, ProtocolError>;

    /// Inbound datagram from `remote`. Never fails; errors are logged.
    fn handle_datagram(&self, datagram: Datagram, remote: PeerId);
}
