use std::time::Duration;

use ppspp_engine::ProtocolState;

use crate::*;

/// P4: after a close and its linger, both ends are Unknown and the pair can
/// be opened again.
#[tokio::test(start_paused = true)]
async fn test_close_then_reopen() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.start_handshake(&b.id(), SWARM)?;
    let first = a.engine().channel(SWARM, &b.id()).context("no channel")?;

    a.send_closing_handshake(&b.id(), SWARM)?;
    assert_eq!(state_of(a, SWARM, &b.id()), ProtocolState::Unknown);
    assert_eq!(state_of(b, SWARM, &a.id()), ProtocolState::Unknown);

    // b does not answer a Close; a holds the old id until the linger ends.
    assert_eq!(a.engine().reserved_ids(), 1);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(a.engine().reserved_ids(), 0);

    a.start_handshake(&b.id(), SWARM)?;
    let second = a.engine().channel(SWARM, &b.id()).context("no channel")?;
    assert_eq!(second.state, ProtocolState::Ready);
    assert_eq!(state_of(b, SWARM, &a.id()), ProtocolState::Ready);
    assert_ne!(second.local_id, first.local_id);
    Ok(())
}

/// Both sides close at once: each Close doubles as the other's reciprocal
/// and no id outlives the exchange.
#[tokio::test(start_paused = true)]
async fn test_crossing_closes_release_immediately() -> Result<()> {
    let mesh = memory_pair()?;
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.start_handshake(&b.id(), SWARM)?;
    mesh.net.take_traffic();

    mesh.net.set_dropping(&a.id(), true);
    mesh.net.set_dropping(&b.id(), true);
    a.send_closing_handshake(&b.id(), SWARM)?;
    b.send_closing_handshake(&a.id(), SWARM)?;
    mesh.net.set_dropping(&a.id(), false);
    mesh.net.set_dropping(&b.id(), false);

    assert_eq!(a.engine().reserved_ids(), 1);
    assert_eq!(b.engine().reserved_ids(), 1);
    for d in mesh.net.take_traffic() {
        mesh.net.inject(&d.from, &d.to, d.datagram)?;
    }
    assert_eq!(a.engine().reserved_ids(), 0);
    assert_eq!(b.engine().reserved_ids(), 0);
    Ok(())
}

/// A shorter linger from configuration is honoured.
#[tokio::test(start_paused = true)]
async fn test_configured_close_timeout() -> Result<()> {
    let config = EngineConfig {
        close_timeout_ms: 250,
        ..EngineConfig::default()
    };
    let mesh = memory_mesh(2, config);
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.connect(&b.id())?;
    a.start_handshake(&b.id(), SWARM)?;
    a.send_closing_handshake(&b.id(), SWARM)?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.engine().reserved_ids(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.engine().reserved_ids(), 0);
    Ok(())
}
