//! Recording engine for transport tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use ppspp_core::{Datagram, PeerId, SwarmId};

use crate::channel::ProtocolState;
use crate::engine::ChannelEngine;
use crate::error::ProtocolError;

/// Accepts every call and queues inbound datagrams for inspection.
#[derive(Default)]
pub struct StubEngine {
    handled: Mutex<VecDeque<(Datagram, PeerId)>>,
    swarms: Mutex<HashSet<SwarmId>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Datagrams received and not yet read.
    pub fn num_handled(&self) -> usize {
        self.handled.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Oldest unread datagram and its sender.
    pub fn read_handled(&self) -> Option<(Datagram, PeerId)> {
        self.handled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn has_swarm(&self, swarm: SwarmId) -> bool {
        self.swarms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&swarm)
    }
}

impl ChannelEngine for StubEngine {
    fn add_swarm(&self, swarm: SwarmId) {
        self.swarms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(swarm);
    }

    fn start_handshake(&self, _remote: &PeerId, _swarm: SwarmId) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn send_closing_handshake(&self, _remote: &PeerId, _swarm: SwarmId) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn protocol_state(&self, _swarm: SwarmId, _remote: &PeerId) -> Result<ProtocolState, ProtocolError> {
        Err(ProtocolError::UnknownChannel)
    }

    fn handle_datagram(&self, datagram: Datagram, remote: PeerId) {
        tracing::trace!(%remote, channel = %datagram.channel, "stub engine recorded datagram");
        self.handled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((datagram, remote));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppspp_core::{ChannelId, Msg};

    #[test]
    fn records_in_arrival_order() {
        let stub = StubEngine::new();
        assert_eq!(stub.num_handled(), 0);
        assert!(stub.read_handled().is_none());

        stub.handle_datagram(Datagram::new(ChannelId(1), vec![Msg::Close]), PeerId::new("a"));
        stub.handle_datagram(Datagram::new(ChannelId(2), vec![]), PeerId::new("b"));
        assert_eq!(stub.num_handled(), 2);

        let (first, from) = stub.read_handled().unwrap();
        assert_eq!(first.channel, ChannelId(1));
        assert_eq!(from, PeerId::new("a"));
        assert_eq!(stub.num_handled(), 1);
    }

    #[test]
    fn add_swarm_is_remembered() {
        let stub = StubEngine::new();
        stub.add_swarm(SwarmId(8));
        assert!(stub.has_swarm(SwarmId(8)));
        assert!(!stub.has_swarm(SwarmId(9)));
    }
}
