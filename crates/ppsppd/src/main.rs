//! ppsppd — PPSPP channel engine daemon.
//!
//! Binds a UDP transport, joins the configured swarms and keeps a channel
//! open to every configured peer on every swarm until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use ppspp_core::config::PpsppConfig;
use ppspp_core::SwarmId;
use ppspp_engine::{Peer, Transport, UdpTransport};

mod maintain;

use maintain::PeerMaintainer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PpsppConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PpsppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PpsppConfig::default()
    });

    let transport = UdpTransport::bind(config.network.bind_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.network.bind_addr))?;
    tracing::info!(peer = %transport.identity(), "ppsppd starting");

    let peer = Arc::new(Peer::new(transport.clone(), config.engine.clone()));

    let swarms: Vec<SwarmId> = config.swarms.iter().copied().map(SwarmId).collect();
    for swarm in &swarms {
        peer.add_swarm(*swarm);
    }
    tracing::info!(
        swarms = swarms.len(),
        peers = config.network.peers.len(),
        close_timeout_ms = config.engine.close_timeout_ms,
        "engine configured"
    );

    let remotes = maintain::resolve_peers(&peer, &config.network.peers).await;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let maintainer_task = tokio::spawn(
        PeerMaintainer::new(
            peer.clone(),
            remotes.clone(),
            swarms.clone(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let channel_printer = {
        let peer = peer.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let live = peer.engine().live_channels();
                tracing::info!(count = live.len(), "channel table snapshot");
                for c in live {
                    tracing::info!(
                        swarm = %c.swarm,
                        remote = %c.remote,
                        channel = %c.local_id,
                        state = %c.state,
                        "  channel"
                    );
                }
            }
        })
    };

    let mut shutdown = shutdown_tx.subscribe();
    let _ = shutdown.recv().await;

    // Best-effort teardown so peers free their slots without waiting.
    for remote in &remotes {
        for swarm in &swarms {
            if let Err(e) = peer.send_closing_handshake(remote, *swarm) {
                tracing::debug!(%remote, %swarm, error = %e, "no channel to close");
            }
        }
    }

    channel_printer.abort();
    if let Err(e) = maintainer_task.await {
        tracing::warn!(error = %e, "maintainer task failed");
    }
    // Give the send worker a moment to flush the queued closes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.shutdown();
    tracing::info!("ppsppd stopped");
    Ok(())
}
