//! A local peer: one transport bound to one channel engine.

use std::sync::{Arc, Weak};

use ppspp_core::config::EngineConfig;
use ppspp_core::{PeerId, SwarmId};

use crate::channel::ProtocolState;
use crate::engine::ChannelEngine;
use crate::error::ProtocolError;
use crate::protocol::Protocol;
use crate::transport::{Address, Transport, TransportError};

pub struct Peer<E: ChannelEngine + 'static = Protocol> {
    transport: Arc<dyn Transport>,
    engine: Arc<E>,
}

impl Peer<Protocol> {
    /// Peer running the production engine.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let engine = Arc::new(Protocol::new(Arc::clone(&transport), config));
        Self::with_engine(transport, engine)
    }
}

impl<E: ChannelEngine + 'static> Peer<E> {
    /// Bind `engine` to `transport`. The transport's inbound handler only
    /// holds a weak reference, so dropping the peer stops dispatch.
    pub fn with_engine(transport: Arc<dyn Transport>, engine: Arc<E>) -> Self {
        let weak: Weak<E> = Arc::downgrade(&engine);
        transport.set_datagram_handler(Arc::new(move |datagram, remote| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_datagram(datagram, remote);
            }
        }));
        Self { transport, engine }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ── Network ──────────────────────────────────────────────────────────────

    pub fn id(&self) -> PeerId {
        self.transport.identity()
    }

    pub fn addrs(&self) -> Vec<Address> {
        self.transport.addresses()
    }

    pub fn add_addrs(&self, remote: &PeerId, addrs: Vec<Address>) {
        self.transport.add_addresses(remote, addrs)
    }

    pub fn connect(&self, remote: &PeerId) -> Result<(), TransportError> {
        self.transport.connect(remote)
    }

    pub fn disconnect(&self, remote: &PeerId) -> Result<(), TransportError> {
        self.transport.disconnect(remote)
    }

    // ── Protocol ─────────────────────────────────────────────────────────────

    pub fn add_swarm(&self, swarm: SwarmId) {
        self.engine.add_swarm(swarm)
    }

    pub fn start_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError> {
        self.engine.start_handshake(remote, swarm)
    }

    pub fn send_closing_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError> {
        self.engine.send_closing_handshake(remote, swarm)
    }

    pub fn protocol_state(&self, swarm: SwarmId, remote: &PeerId) -> Result<ProtocolState, ProtocolError> {
        self.engine.protocol_state(swarm, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryNetwork, MemoryTransport};
    use crate::stub::StubEngine;
    use ppspp_core::{ChannelId, Datagram, Msg};

    fn stub_pair() -> (Peer<StubEngine>, Peer<StubEngine>) {
        let net = MemoryNetwork::new();
        let a: Arc<MemoryTransport> = net.endpoint();
        let b: Arc<MemoryTransport> = net.endpoint();
        (
            Peer::with_engine(a, Arc::new(StubEngine::new())),
            Peer::with_engine(b, Arc::new(StubEngine::new())),
        )
    }

    #[test]
    fn inbound_datagrams_reach_the_engine() {
        let (a, b) = stub_pair();
        a.add_addrs(&b.id(), b.addrs());
        a.connect(&b.id()).unwrap();

        let d = Datagram::new(ChannelId(4), vec![Msg::Close]);
        a.transport().send_datagram(&d, &b.id()).unwrap();

        assert_eq!(b.engine().num_handled(), 1);
        let (got, from) = b.engine().read_handled().unwrap();
        assert_eq!(got, d);
        assert_eq!(from, a.id());
        assert_eq!(a.engine().num_handled(), 0);
    }

    #[test]
    fn disconnect_disconnects() {
        let (a, b) = stub_pair();
        a.add_addrs(&b.id(), b.addrs());
        a.connect(&b.id()).unwrap();
        a.disconnect(&b.id()).unwrap();

        let d = Datagram::new(ChannelId(4), vec![]);
        assert!(matches!(
            a.transport().send_datagram(&d, &b.id()),
            Err(TransportError::NotConnected(_))
        ));
        assert!(matches!(
            b.transport().send_datagram(&d, &a.id()),
            Err(TransportError::NotConnected(_))
        ));
    }

    #[test]
    fn dropped_engine_stops_dispatch() {
        let net = MemoryNetwork::new();
        let a = net.endpoint();
        let b = net.endpoint();
        let receiver = Peer::with_engine(b.clone(), Arc::new(StubEngine::new()));
        let id = receiver.id();
        drop(receiver);

        a.add_addresses(&id, b.addresses());
        a.connect(&id).unwrap();
        a.send_datagram(&Datagram::new(ChannelId(1), vec![]), &id)
            .unwrap();
    }

    #[test]
    fn add_swarm_goes_to_engine() {
        let (a, _b) = stub_pair();
        a.add_swarm(SwarmId(8));
        assert!(a.engine().has_swarm(SwarmId(8)));
    }
}
