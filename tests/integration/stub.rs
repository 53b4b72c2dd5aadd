use std::sync::Arc;

use ppspp_core::{ChannelId, ChunkId, Datagram, Msg};
use ppspp_engine::{MemoryNetwork, Peer, StubEngine, Transport};

use crate::*;

/// Datagrams sent over the network arrive, intact and in order, at the
/// receiving peer's engine.
#[test]
fn test_send_datagram_reaches_engine() -> Result<()> {
    let net = MemoryNetwork::new();
    let sender = Peer::with_engine(net.endpoint(), Arc::new(StubEngine::new()));
    let receiver = Peer::with_engine(net.endpoint(), Arc::new(StubEngine::new()));
    sender.add_addrs(&receiver.id(), receiver.addrs());
    sender.connect(&receiver.id())?;

    let first = Datagram::new(
        ChannelId(3),
        vec![
            Msg::Have { start: ChunkId(0), end: ChunkId(16) },
            Msg::Close,
        ],
    );
    let second = Datagram::new(ChannelId(4), vec![]);
    sender.transport().send_datagram(&first, &receiver.id())?;
    sender.transport().send_datagram(&second, &receiver.id())?;

    let engine = receiver.engine();
    assert_eq!(engine.num_handled(), 2);
    let (got, from) = engine.read_handled().context("first datagram missing")?;
    assert_eq!(got, first);
    assert_eq!(from, sender.id());
    let (got, _) = engine.read_handled().context("second datagram missing")?;
    assert_eq!(got, second);
    assert_eq!(engine.num_handled(), 0);
    assert_eq!(sender.engine().num_handled(), 0);
    Ok(())
}
