use std::sync::Arc;
use std::thread;

use ppspp_core::Msg;
use ppspp_engine::{ProtocolError, ProtocolState};

use crate::*;

/// Reference scenario: engine 1 opens swarm 8 towards engine 2, engine 2
/// closes it again.
#[test]
fn test_two_peer_swarm_8_scenario() -> Result<()> {
    let mesh = memory_pair()?;
    let (one, two) = (&mesh.peers[0], &mesh.peers[1]);

    one.add_swarm(SWARM);
    one.start_handshake(&two.id(), SWARM)?;

    assert_eq!(one.protocol_state(SWARM, &two.id())?, ProtocolState::Ready);
    assert_eq!(two.protocol_state(SWARM, &one.id())?, ProtocolState::Ready);

    two.send_closing_handshake(&one.id(), SWARM)?;

    assert!(matches!(
        one.protocol_state(SWARM, &two.id()),
        Err(ProtocolError::UnknownChannel)
    ));
    assert!(matches!(
        two.protocol_state(SWARM, &one.id()),
        Err(ProtocolError::UnknownChannel)
    ));
    Ok(())
}

/// P2: both ends converge on Ready with each other's identifiers.
#[test]
fn test_handshake_convergence_across_mesh() -> Result<()> {
    let mesh = memory_mesh(4, EngineConfig::default());
    let initiator = &mesh.peers[0];

    for remote in &mesh.peers[1..] {
        initiator.connect(&remote.id())?;
        initiator.start_handshake(&remote.id(), SWARM)?;
    }

    for remote in &mesh.peers[1..] {
        let ours = initiator
            .engine()
            .channel(SWARM, &remote.id())
            .context("initiator lost a channel")?;
        let theirs = remote
            .engine()
            .channel(SWARM, &initiator.id())
            .context("responder has no channel")?;
        assert_eq!(ours.state, ProtocolState::Ready);
        assert_eq!(theirs.state, ProtocolState::Ready);
        assert_eq!(ours.remote_id, Some(theirs.local_id));
        assert_eq!(theirs.remote_id, Some(ours.local_id));
    }

    // Local ids are distinct within one engine.
    let mut ids: Vec<_> = initiator
        .engine()
        .live_channels()
        .into_iter()
        .map(|c| c.local_id)
        .collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    Ok(())
}

/// P3: replaying a delivered request re-sends the ack and changes nothing.
#[test]
fn test_replayed_request_is_idempotent() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.start_handshake(&b.id(), SWARM)?;

    let request = mesh
        .net
        .take_traffic()
        .into_iter()
        .find(|d| matches!(d.datagram.messages[..], [Msg::HandshakeRequest { .. }]))
        .context("no request on the wire")?;
    let before = b.engine().channel(SWARM, &a.id());

    for _ in 0..3 {
        mesh.net.inject(&request.from, &request.to, request.datagram.clone())?;
    }

    let acks = mesh.net.take_traffic();
    assert_eq!(acks.len(), 3);
    assert!(acks
        .iter()
        .all(|d| matches!(d.datagram.messages[..], [Msg::HandshakeAck { .. }])));
    assert_eq!(b.engine().channel(SWARM, &a.id()), before);
    assert_eq!(b.engine().live_channels().len(), 1);
    Ok(())
}

/// P1: concurrent opens from both ends leave exactly one channel per side.
#[test]
fn test_concurrent_open_keeps_one_channel_per_pair() -> Result<()> {
    for _ in 0..20 {
        let mesh = memory_pair()?;
        let peers: Vec<Arc<_>> = mesh.peers.into_iter().map(Arc::new).collect();
        let (a_id, b_id) = (peers[0].id(), peers[1].id());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let (local, remote) = if i % 2 == 0 {
                    (Arc::clone(&peers[0]), b_id.clone())
                } else {
                    (Arc::clone(&peers[1]), a_id.clone())
                };
                thread::spawn(move || match local.start_handshake(&remote, SWARM) {
                    Ok(()) | Err(ProtocolError::DuplicateChannel { .. }) => Ok(()),
                    Err(e) => Err(e),
                })
            })
            .collect();
        for h in handles {
            h.join().expect("handshake thread panicked")?;
        }

        let ours = peers[0]
            .engine()
            .channel(SWARM, &b_id)
            .context("a has no channel")?;
        let theirs = peers[1]
            .engine()
            .channel(SWARM, &a_id)
            .context("b has no channel")?;
        assert_eq!(peers[0].engine().live_channels().len(), 1);
        assert_eq!(peers[1].engine().live_channels().len(), 1);
        assert_eq!(ours.state, ProtocolState::Ready);
        assert_eq!(theirs.state, ProtocolState::Ready);
        assert_eq!(ours.remote_id, Some(theirs.local_id));
    }
    Ok(())
}

/// Channels on different swarms between the same peers are independent.
#[test]
fn test_swarms_are_independent() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);

    a.start_handshake(&b.id(), SwarmId(1))?;
    a.start_handshake(&b.id(), SwarmId(2))?;
    b.send_closing_handshake(&a.id(), SwarmId(1))?;

    assert_eq!(state_of(a, SwarmId(1), &b.id()), ProtocolState::Unknown);
    assert_eq!(state_of(a, SwarmId(2), &b.id()), ProtocolState::Ready);
    assert_eq!(state_of(b, SwarmId(2), &a.id()), ProtocolState::Ready);
    Ok(())
}
