use ppspp_core::{ChunkId, Datagram};
use ppspp_engine::{ProtocolError, ProtocolState, Transport, TransportError};

use crate::*;

/// P5: once disconnected, sends fail with NotConnected and no channel moves.
#[test]
fn test_disconnect_isolates_peers() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.start_handshake(&b.id(), SWARM)?;
    let before_a = a.engine().channel(SWARM, &b.id());
    let before_b = b.engine().channel(SWARM, &a.id());

    a.disconnect(&b.id())?;

    let empty = Datagram::new(before_b.as_ref().context("no channel")?.local_id, vec![]);
    assert!(matches!(
        a.transport().send_datagram(&empty, &b.id()),
        Err(TransportError::NotConnected(_))
    ));
    assert!(matches!(
        b.transport().send_datagram(&empty, &a.id()),
        Err(TransportError::NotConnected(_))
    ));

    assert!(matches!(
        a.send_closing_handshake(&b.id(), SWARM),
        Err(ProtocolError::NotConnected(_))
    ));
    assert!(matches!(
        a.engine().send_have(&b.id(), SWARM, ChunkId(0), ChunkId(8)),
        Err(ProtocolError::NotConnected(_))
    ));
    assert!(matches!(
        b.start_handshake(&a.id(), SwarmId(9)),
        Err(ProtocolError::NotConnected(_))
    ));

    assert_eq!(a.engine().channel(SWARM, &b.id()), before_a);
    assert_eq!(b.engine().channel(SWARM, &a.id()), before_b);
    assert_eq!(state_of(b, SwarmId(9), &a.id()), ProtocolState::Unknown);
    Ok(())
}

/// Reconnecting after a disconnect restores traffic on the same channel.
#[test]
fn test_reconnect_resumes_channel() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.start_handshake(&b.id(), SWARM)?;
    a.disconnect(&b.id())?;
    a.connect(&b.id())?;

    a.engine().send_have(&b.id(), SWARM, ChunkId(0), ChunkId(8))?;
    b.send_closing_handshake(&a.id(), SWARM)?;
    assert_eq!(state_of(a, SWARM, &b.id()), ProtocolState::Unknown);
    Ok(())
}
