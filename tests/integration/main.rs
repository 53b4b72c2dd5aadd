//! PPSPP engine integration harness.
//!
//! Scenarios run whole engines against each other: over the in-process
//! `MemoryNetwork` (deterministic, synchronous delivery) and over loopback
//! UDP. Nothing here needs privileges or external setup.
//!
//!   cargo test --test integration

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use ppspp_core::config::EngineConfig;
use ppspp_core::{PeerId, SwarmId};
use ppspp_engine::{ChannelEngine, MemoryNetwork, Peer, ProtocolState};

mod handshake;
mod isolation;
mod stub;
mod teardown;
mod udp;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Swarm used by the reference two-peer scenario.
pub const SWARM: SwarmId = SwarmId(8);

pub struct Mesh {
    pub net: MemoryNetwork,
    pub peers: Vec<Peer>,
}

/// `n` engines on one memory network, each knowing every other's address.
/// Nothing is connected yet.
pub fn memory_mesh(n: usize, config: EngineConfig) -> Mesh {
    let net = MemoryNetwork::new();
    let peers: Vec<Peer> = (0..n)
        .map(|_| Peer::new(net.endpoint(), config.clone()))
        .collect();
    for a in &peers {
        for b in &peers {
            if a.id() != b.id() {
                a.add_addrs(&b.id(), b.addrs());
            }
        }
    }
    Mesh { net, peers }
}

/// Two connected engines with default configuration.
pub fn memory_pair() -> Result<Mesh> {
    let mesh = memory_mesh(2, EngineConfig::default());
    let (a, b) = (&mesh.peers[0], &mesh.peers[1]);
    a.connect(&b.id())
        .with_context(|| format!("failed to connect {} to {}", a.id(), b.id()))?;
    Ok(mesh)
}

/// State of the pair's channel, `Unknown` when there is none.
pub fn state_of<E: ChannelEngine + 'static>(peer: &Peer<E>, swarm: SwarmId, remote: &PeerId) -> ProtocolState {
    peer.protocol_state(swarm, remote)
        .unwrap_or(ProtocolState::Unknown)
}

/// Poll until the pair reaches `want` or `timeout` elapses.
pub async fn wait_for_state(
    peer: &Peer,
    swarm: SwarmId,
    remote: &PeerId,
    want: ProtocolState,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = state_of(peer, swarm, remote);
        if now == want {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "{} never reached {want} with {remote} on swarm {swarm} (still {now})",
                peer.id()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
