//! Protocol facade: the engine's public surface.
//!
//! Lock discipline: one registry-wide mutex. Every lookup, allocation,
//! transition and removal happens under it, which is what keeps a (swarm,
//! remote) pair to a single live channel. The lock is never held while the
//! transport is called: outbound datagrams are computed under the lock, sent
//! after it is released, and any transition that depends on the send result
//! re-checks the channel by (id, epoch) first.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use ppspp_core::config::EngineConfig;
use ppspp_core::{wire, ChannelId, ChunkId, Datagram, Msg, PeerId, SwarmId};

use crate::channel::{ChannelSnapshot, ProtocolState};
use crate::engine::ChannelEngine;
use crate::error::ProtocolError;
use crate::registry::Registry;
use crate::transport::Transport;

/// Receives chunk-availability announcements from Ready channels.
///
/// The engine keeps no availability state of its own; this is the hook for
/// the storage/availability layer.
pub trait HaveSink: Send + Sync {
    fn on_have(&self, swarm: SwarmId, remote: &PeerId, start: ChunkId, end: ChunkId);
}

/// Default sink: logs and forgets.
pub struct LogHaveSink;

impl HaveSink for LogHaveSink {
    fn on_have(&self, swarm: SwarmId, remote: &PeerId, start: ChunkId, end: ChunkId) {
        tracing::debug!(%swarm, %remote, %start, %end, "peer announced chunks");
    }
}

/// A datagram produced under the lock, sent after it is released.
struct Outbound {
    datagram: Datagram,
    /// Channel to mark Ready once the transport accepts this ack.
    ack_for: Option<(ChannelId, u64)>,
}

/// Production [`ChannelEngine`].
pub struct Protocol {
    registry: Arc<Mutex<Registry>>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    have_sink: RwLock<Arc<dyn HaveSink>>,
}

impl Protocol {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self::with_registry(transport, config, Registry::new())
    }

    /// Start from a pre-built registry (custom id range, pre-added swarms).
    pub fn with_registry(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        registry: Registry,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            transport,
            config,
            have_sink: RwLock::new(Arc::new(LogHaveSink)),
        }
    }

    pub fn set_have_sink(&self, sink: Arc<dyn HaveSink>) {
        *self.have_sink.write().unwrap_or_else(|e| e.into_inner()) = sink;
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.identity()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn have_sink(&self) -> Arc<dyn HaveSink> {
        self.have_sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn ensure_swarm(&self, registry: &mut Registry, swarm: SwarmId) -> Result<(), ProtocolError> {
        if registry.has_swarm(swarm) {
            return Ok(());
        }
        if self.config.require_swarm_interest {
            return Err(ProtocolError::UnknownSwarm(swarm));
        }
        tracing::debug!(%swarm, "registering swarm on first use");
        registry.add_swarm(swarm);
        Ok(())
    }

    // ── Local operations ─────────────────────────────────────────────────────

    pub fn add_swarm(&self, swarm: SwarmId) {
        if self.registry().add_swarm(swarm) {
            tracing::info!(%swarm, "joined swarm");
        }
    }

    /// Open a channel with `remote` on `swarm`. Returns once the request has
    /// been handed to the transport; poll [`Protocol::protocol_state`] for
    /// completion.
    pub fn start_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError> {
        let (datagram, id, epoch) = {
            let mut registry = self.registry();
            self.ensure_swarm(&mut registry, swarm)?;
            let channel = registry.allocate_channel(swarm, remote)?;
            (channel.start(), channel.local_id(), channel.epoch())
        };
        tracing::debug!(%remote, %swarm, channel = %id, "sending handshake request");

        if let Err(e) = self.transport.send_datagram(&datagram, remote) {
            // Undo: the failed send must not leave a channel behind.
            let mut registry = self.registry();
            if registry.lookup_epoch_mut(id, epoch).is_some() {
                registry.remove(id);
            }
            tracing::debug!(%remote, %swarm, error = %e, "handshake request not sent");
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the channel with `remote` on `swarm`.
    ///
    /// The (swarm, remote) slot is released as soon as the Close has been
    /// handed to the transport: `protocol_state` then reports Unknown and a
    /// new handshake may start at once, even if the peer never answers. The
    /// old local id stays reserved until a reciprocal Close arrives or
    /// `close_timeout` elapses.
    pub fn send_closing_handshake(
        &self,
        remote: &PeerId,
        swarm: SwarmId,
    ) -> Result<(), ProtocolError> {
        let (id, epoch, datagram) = {
            let registry = self.registry();
            let channel = registry
                .lookup_by_peer(swarm, remote)
                .ok_or(ProtocolError::UnknownChannel)?;
            (channel.local_id(), channel.epoch(), channel.close_datagram())
        };

        match &datagram {
            Some(d) => {
                self.transport.send_datagram(d, remote)?;
                tracing::debug!(%remote, %swarm, channel = %id, "sent close");
            }
            None => {
                tracing::debug!(%remote, %swarm, channel = %id, "closing before peer id known, nothing to send");
            }
        }

        let mut registry = self.registry();
        // The peer may have closed in the meantime; then there is nothing left to do.
        let still_live = registry
            .lookup_epoch_mut(id, epoch)
            .is_some_and(|c| c.state().is_live());
        if still_live {
            registry.begin_close(id);
            self.schedule_release(&mut registry, id, epoch, swarm, remote.clone());
            tracing::info!(%remote, %swarm, channel = %id, "channel closing");
        }
        Ok(())
    }

    /// Arrange for a Closing channel's id to be released after the linger
    /// timeout. Released at once when there is no runtime to run the timer.
    fn schedule_release(
        &self,
        registry: &mut Registry,
        id: ChannelId,
        epoch: u64,
        swarm: SwarmId,
        remote: PeerId,
    ) {
        let timeout = self.config.close_timeout();
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) if timeout > Duration::ZERO => handle,
            _ => {
                registry.remove(id);
                return;
            }
        };

        let shared = Arc::clone(&self.registry);
        let timer = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut registry = lock(&shared);
            let expired = registry
                .lookup_epoch_mut(id, epoch)
                .is_some_and(|c| c.state() == ProtocolState::Closing);
            if expired {
                registry.remove(id);
                let reason = ProtocolError::Timeout { swarm, remote };
                tracing::debug!(channel = %id, error = %reason, "released closing channel");
            }
        });
        if let Some(channel) = registry.lookup_epoch_mut(id, epoch) {
            channel.set_close_timer(timer.abort_handle());
        }
    }

    /// Announce chunks `[start, end)` on a Ready channel.
    pub fn send_have(
        &self,
        remote: &PeerId,
        swarm: SwarmId,
        start: ChunkId,
        end: ChunkId,
    ) -> Result<(), ProtocolError> {
        let datagram = {
            let registry = self.registry();
            registry
                .lookup_by_peer(swarm, remote)
                .ok_or(ProtocolError::UnknownChannel)?
                .have(start, end)?
        };
        self.transport.send_datagram(&datagram, remote)?;
        Ok(())
    }

    /// State of the live channel for the pair. `UnknownChannel` means the
    /// state is [`ProtocolState::Unknown`].
    pub fn protocol_state(
        &self,
        swarm: SwarmId,
        remote: &PeerId,
    ) -> Result<ProtocolState, ProtocolError> {
        self.registry()
            .lookup_by_peer(swarm, remote)
            .map(|c| c.state())
            .ok_or(ProtocolError::UnknownChannel)
    }

    pub fn state_or_unknown(&self, swarm: SwarmId, remote: &PeerId) -> ProtocolState {
        self.protocol_state(swarm, remote)
            .unwrap_or(ProtocolState::Unknown)
    }

    pub fn channel(&self, swarm: SwarmId, remote: &PeerId) -> Option<ChannelSnapshot> {
        self.registry()
            .lookup_by_peer(swarm, remote)
            .map(|c| c.snapshot())
    }

    pub fn live_channels(&self) -> Vec<ChannelSnapshot> {
        self.registry().live_channels()
    }

    /// Channels still holding a local id, Closing ones included.
    pub fn reserved_ids(&self) -> usize {
        self.registry().len()
    }

    pub fn swarms(&self) -> Vec<SwarmId> {
        self.registry().swarms()
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Transport callback. Errors are logged and the offending data dropped.
    pub fn handle_datagram(&self, datagram: Datagram, remote: PeerId) {
        if let Err(e) = self.dispatch(datagram, &remote) {
            tracing::warn!(%remote, error = %e, "dropped inbound datagram");
        }
    }

    /// Apply an inbound datagram and send any replies.
    ///
    /// Messages are applied in order. A message that fails is dropped and
    /// processing continues with the next; the first error is returned.
    pub fn dispatch(&self, datagram: Datagram, remote: &PeerId) -> Result<(), ProtocolError> {
        let (channel, messages) = wire::unframe(datagram);
        let mut first_err: Option<ProtocolError> = None;
        let mut outbound: Vec<Outbound> = Vec::new();
        let mut haves: Vec<(SwarmId, ChunkId, ChunkId)> = Vec::new();

        {
            let mut registry = self.registry();

            // Target channel as (local id, epoch); channel 0 has none until a
            // request creates or finds one. Requests route by swarm, so only a
            // datagram without one is rejected outright.
            let mut target = None;
            if !channel.is_zero() {
                match registry.lookup_by_local_id(channel) {
                    Some(c) if c.remote() == remote => target = Some((channel, c.epoch())),
                    _ if messages
                        .iter()
                        .any(|m| matches!(m, Msg::HandshakeRequest { .. })) => {}
                    _ => {
                        tracing::debug!(%remote, channel = %channel, "datagram for unknown channel");
                        return Err(ProtocolError::UnknownChannel);
                    }
                }
            }

            for msg in messages {
                let kind = msg.kind();
                let result = self.apply(
                    &mut registry,
                    &mut target,
                    msg,
                    remote,
                    &mut outbound,
                    &mut haves,
                );
                if let Err(e) = result {
                    tracing::debug!(%remote, msg = kind, error = %e, "message dropped");
                    first_err.get_or_insert(e);
                }
            }
        }

        let sink = self.have_sink();
        for (swarm, start, end) in haves {
            sink.on_have(swarm, remote, start, end);
        }

        for out in outbound {
            match self.transport.send_datagram(&out.datagram, remote) {
                Ok(()) => {
                    if let Some((id, epoch)) = out.ack_for {
                        let mut registry = self.registry();
                        let ready = registry
                            .lookup_epoch_mut(id, epoch)
                            .is_some_and(|c| c.ack_sent());
                        if ready {
                            tracing::info!(%remote, channel = %id, "channel ready (responder)");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%remote, error = %e, "reply not sent");
                    first_err.get_or_insert(e.into());
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply(
        &self,
        registry: &mut Registry,
        target: &mut Option<(ChannelId, u64)>,
        msg: Msg,
        remote: &PeerId,
        outbound: &mut Vec<Outbound>,
        haves: &mut Vec<(SwarmId, ChunkId, ChunkId)>,
    ) -> Result<(), ProtocolError> {
        if let Msg::HandshakeRequest { swarm, channel } = msg {
            let (id, epoch, ack) = self.on_request(registry, swarm, channel, remote)?;
            *target = Some((id, epoch));
            outbound.push(Outbound {
                datagram: ack,
                ack_for: Some((id, epoch)),
            });
            return Ok(());
        }

        let (id, epoch) = target.ok_or(ProtocolError::UnknownChannel)?;
        let channel = registry
            .lookup_epoch_mut(id, epoch)
            .ok_or(ProtocolError::UnknownChannel)?;

        match msg {
            Msg::HandshakeAck { channel: theirs } => {
                if channel.on_ack(theirs)? {
                    tracing::info!(%remote, swarm = %channel.swarm(), channel = %id, "channel ready (initiator)");
                }
            }
            Msg::Have { start, end } => {
                channel.on_have(start, end)?;
                haves.push((channel.swarm(), start, end));
            }
            Msg::Close => {
                let was = channel.state();
                let swarm = channel.swarm();
                registry.remove(id);
                *target = None;
                if was == ProtocolState::Closing {
                    tracing::debug!(%remote, %swarm, channel = %id, "reciprocal close, channel gone");
                } else {
                    tracing::info!(%remote, %swarm, channel = %id, "peer closed channel");
                }
            }
            Msg::HandshakeRequest { .. } => {}
        }
        Ok(())
    }

    /// Fresh or retransmitted request: find or create the pair's channel and
    /// build the ack.
    fn on_request(
        &self,
        registry: &mut Registry,
        swarm: SwarmId,
        theirs: ChannelId,
        remote: &PeerId,
    ) -> Result<(ChannelId, u64, Datagram), ProtocolError> {
        if theirs.is_zero() {
            return Err(ProtocolError::InvalidHandshake(
                "request carries reserved channel 0",
            ));
        }
        let mut stale = None;
        if let Some(channel) = registry.lookup_by_peer_mut(swarm, remote) {
            match channel.remote_id() {
                // The peer abandoned the channel we know and opened a new one.
                Some(known) if known != theirs => stale = Some((channel.local_id(), known)),
                _ => {
                    tracing::debug!(
                        %remote,
                        %swarm,
                        channel = %channel.local_id(),
                        state = %channel.state(),
                        "repeated handshake request, acking again"
                    );
                    let ack = channel.on_request(theirs)?;
                    return Ok((channel.local_id(), channel.epoch(), ack));
                }
            }
        }
        if let Some((id, known)) = stale {
            registry.remove(id);
            tracing::info!(
                %remote,
                %swarm,
                channel = %id,
                old = %known,
                new = %theirs,
                "peer restarted handshake, replacing stale channel"
            );
        }

        self.ensure_swarm(registry, swarm)?;
        let channel = registry.allocate_channel(swarm, remote)?;
        let ack = channel.on_request(theirs)?;
        tracing::debug!(%remote, %swarm, channel = %channel.local_id(), theirs = %theirs, "accepted handshake request");
        Ok((channel.local_id(), channel.epoch(), ack))
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

impl ChannelEngine for Protocol {
    fn add_swarm(&self, swarm: SwarmId) {
        Protocol::add_swarm(self, swarm)
    }

    fn start_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError> {
        Protocol::start_handshake(self, remote, swarm)
    }

    fn send_closing_handshake(&self, remote: &PeerId, swarm: SwarmId) -> Result<(), ProtocolError> {
        Protocol::send_closing_handshake(self, remote, swarm)
    }

    fn protocol_state(&self, swarm: SwarmId, remote: &PeerId) -> Result<ProtocolState, ProtocolError> {
        Protocol::protocol_state(self, swarm, remote)
    }

    fn handle_datagram(&self, datagram: Datagram, remote: PeerId) {
        Protocol::handle_datagram(self, datagram, remote)
    }
}
