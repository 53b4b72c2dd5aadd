use std::time::Duration;

use ppspp_engine::{ProtocolState, UdpTransport};

use crate::*;

const WAIT: Duration = Duration::from_secs(5);

/// Handshake and teardown over real loopback sockets. Only the initiator is
/// told the responder's address; the responder learns it from traffic.
#[tokio::test]
async fn test_udp_loopback_handshake_and_close() -> Result<()> {
    let ta = UdpTransport::bind("127.0.0.1:0").await.context("bind a")?;
    let tb = UdpTransport::bind("127.0.0.1:0").await.context("bind b")?;
    let a = Peer::new(ta.clone(), EngineConfig::default());
    let b = Peer::new(tb.clone(), EngineConfig::default());

    a.add_addrs(&b.id(), b.addrs());
    a.connect(&b.id())?;
    a.add_swarm(SWARM);
    a.start_handshake(&b.id(), SWARM)?;

    wait_for_state(&a, SWARM, &b.id(), ProtocolState::Ready, WAIT).await?;
    wait_for_state(&b, SWARM, &a.id(), ProtocolState::Ready, WAIT).await?;

    b.send_closing_handshake(&a.id(), SWARM)?;
    assert_eq!(state_of(&b, SWARM, &a.id()), ProtocolState::Unknown);
    wait_for_state(&a, SWARM, &b.id(), ProtocolState::Unknown, WAIT).await?;

    ta.shutdown();
    tb.shutdown();
    Ok(())
}
