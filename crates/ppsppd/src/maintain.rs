//! Keeps a channel open to every configured peer on every joined swarm.
//!
//! UDP may lose a handshake. Each tick starts a handshake for pairs with no
//! channel and restarts pairs that were still handshaking on the previous
//! tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use ppspp_core::{PeerId, SwarmId};
use ppspp_engine::{peer_id_for, Address, Peer, ProtocolError, ProtocolState};

const TICK: Duration = Duration::from_secs(3);

/// Resolve configured `host:port` entries, register their addresses and
/// connect. Unresolvable entries are logged and skipped.
pub async fn resolve_peers(peer: &Peer, entries: &[String]) -> Vec<PeerId> {
    let mut remotes = Vec::new();
    for entry in entries {
        let addr = match tokio::net::lookup_host(entry.as_str()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    tracing::warn!(peer = %entry, "peer resolved to no address");
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!(peer = %entry, error = %e, "failed to resolve peer");
                continue;
            }
        };

        let remote = peer_id_for(addr);
        peer.add_addrs(&remote, vec![Address::new(addr.to_string())]);
        match peer.connect(&remote) {
            Ok(()) => {
                tracing::info!(%remote, "peer configured");
                remotes.push(remote);
            }
            Err(e) => tracing::warn!(%remote, error = %e, "failed to connect peer"),
        }
    }
    remotes
}

pub struct PeerMaintainer {
    peer: Arc<Peer>,
    remotes: Vec<PeerId>,
    swarms: Vec<SwarmId>,
    shutdown: broadcast::Receiver<()>,
    /// Pairs seen handshaking on the previous tick.
    stalled: HashSet<(SwarmId, PeerId)>,
}

impl PeerMaintainer {
    pub fn new(
        peer: Arc<Peer>,
        remotes: Vec<PeerId>,
        swarms: Vec<SwarmId>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            peer,
            remotes,
            swarms,
            shutdown,
            stalled: HashSet::new(),
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("peer maintainer shutting down");
                    return;
                }

                _ = interval.tick() => self.tick(),
            }
        }
    }

    fn tick(&mut self) {
        let mut handshaking = HashSet::new();
        for remote in &self.remotes {
            for &swarm in &self.swarms {
                let key = (swarm, remote.clone());
                match self.peer.protocol_state(swarm, remote) {
                    Ok(ProtocolState::Ready) => {}
                    Ok(ProtocolState::Handshaking) if self.stalled.contains(&key) => {
                        tracing::debug!(%remote, %swarm, "handshake stalled, restarting");
                        if let Err(e) = self.peer.send_closing_handshake(remote, swarm) {
                            tracing::warn!(%remote, %swarm, error = %e, "failed to abandon handshake");
                        }
                    }
                    Ok(_) => {
                        handshaking.insert(key);
                    }
                    Err(ProtocolError::UnknownChannel) => {
                        match self.peer.start_handshake(remote, swarm) {
                            Ok(()) => {
                                handshaking.insert(key);
                            }
                            Err(e) => tracing::warn!(%remote, %swarm, error = %e, "failed to start handshake"),
                        }
                    }
                    Err(e) => tracing::warn!(%remote, %swarm, error = %e, "state query failed"),
                }
            }
        }
        self.stalled = handshaking;
    }
}
