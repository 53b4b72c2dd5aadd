//! Channel state machine, one instance per (swarm, remote peer).
//!
//! ```text
//!   initiator:  Unknown --start--> Handshaking --ack--> Ready
//!   responder:  Unknown --request--> Handshaking --ack sent--> Ready
//!   Ready/Handshaking --local close--> Closing --close|timeout--> Gone
//!   Ready/Handshaking --remote close--> Gone
//! ```
//!
//! Methods here are pure transitions: they never touch the network or the
//! registry. The caller holds the registry lock while calling them and sends
//! the returned datagrams after releasing it.

use std::fmt;

use tokio::task::AbortHandle;

use ppspp_core::{ChannelId, ChunkId, Datagram, Msg, PeerId, SwarmId};

use crate::error::ProtocolError;

/// Lifecycle state of a channel as seen by the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// No channel exists for the pair.
    Unknown,
    /// Request sent or received, negotiation not finished.
    Handshaking,
    /// Both identifiers known; chunk traffic allowed.
    Ready,
    /// Close sent; the local id stays reserved until a reciprocal close or
    /// the linger timeout.
    Closing,
    /// Removed from the registry.
    Gone,
}

impl ProtocolState {
    /// Live channels occupy the (swarm, remote) slot.
    pub fn is_live(self) -> bool {
        matches!(self, ProtocolState::Handshaking | ProtocolState::Ready)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolState::Unknown => "unknown",
            ProtocolState::Handshaking => "handshaking",
            ProtocolState::Ready => "ready",
            ProtocolState::Closing => "closing",
            ProtocolState::Gone => "gone",
        };
        f.write_str(s)
    }
}

/// A negotiated (or negotiating) channel. Owned by the registry.
#[derive(Debug)]
pub struct Channel {
    swarm: SwarmId,
    remote: PeerId,
    local_id: ChannelId,
    remote_id: Option<ChannelId>,
    state: ProtocolState,
    /// Distinguishes successive channels that reuse the same local id.
    epoch: u64,
    close_timer: Option<AbortHandle>,
}

/// Point-in-time copy of a channel's public attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub swarm: SwarmId,
    pub remote: PeerId,
    pub local_id: ChannelId,
    pub remote_id: Option<ChannelId>,
    pub state: ProtocolState,
}

impl Channel {
    pub(crate) fn new(swarm: SwarmId, remote: PeerId, local_id: ChannelId, epoch: u64) -> Self {
        Self {
            swarm,
            remote,
            local_id,
            remote_id: None,
            state: ProtocolState::Unknown,
            epoch,
            close_timer: None,
        }
    }

    pub fn swarm(&self) -> SwarmId {
        self.swarm
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn local_id(&self) -> ChannelId {
        self.local_id
    }

    pub fn remote_id(&self) -> Option<ChannelId> {
        self.remote_id
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            swarm: self.swarm,
            remote: self.remote.clone(),
            local_id: self.local_id,
            remote_id: self.remote_id,
            state: self.state,
        }
    }

    /// Set once; later values are ignored.
    fn learn_remote_id(&mut self, theirs: ChannelId) {
        match self.remote_id {
            None => self.remote_id = Some(theirs),
            Some(known) if known != theirs => {
                tracing::debug!(
                    remote = %self.remote,
                    channel = %self.local_id,
                    known = %known,
                    offered = %theirs,
                    "peer offered a different channel id, keeping the first"
                );
            }
            Some(_) => {}
        }
    }

    fn ack_to(&self, theirs: ChannelId) -> Datagram {
        Datagram::new(
            theirs,
            vec![Msg::HandshakeAck {
                channel: self.local_id,
            }],
        )
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// Local start: Unknown → Handshaking. Returns the request for channel 0.
    pub(crate) fn start(&mut self) -> Datagram {
        self.state = ProtocolState::Handshaking;
        Datagram::new(
            ChannelId::ZERO,
            vec![Msg::HandshakeRequest {
                swarm: self.swarm,
                channel: self.local_id,
            }],
        )
    }

    /// Inbound request, fresh or retransmitted. Returns the ack to send.
    ///
    /// A fresh channel moves to Handshaking; it becomes Ready once the ack
    /// has been handed to the transport (see [`Channel::ack_sent`]). A Ready
    /// channel stays Ready and acks again.
    pub(crate) fn on_request(&mut self, theirs: ChannelId) -> Result<Datagram, ProtocolError> {
        if theirs.is_zero() {
            return Err(ProtocolError::InvalidHandshake(
                "request carries reserved channel 0",
            ));
        }
        match self.state {
            ProtocolState::Unknown => self.state = ProtocolState::Handshaking,
            ProtocolState::Handshaking | ProtocolState::Ready => {}
            state => {
                return Err(ProtocolError::PrematureMessage {
                    state,
                    what: "handshake-request",
                })
            }
        }
        self.learn_remote_id(theirs);
        Ok(self.ack_to(theirs))
    }

    /// Our ack for this channel reached the transport.
    pub(crate) fn ack_sent(&mut self) -> bool {
        if self.state == ProtocolState::Handshaking && self.remote_id.is_some() {
            self.state = ProtocolState::Ready;
            return true;
        }
        false
    }

    /// Inbound ack: Handshaking → Ready. Idempotent once Ready.
    pub(crate) fn on_ack(&mut self, theirs: ChannelId) -> Result<bool, ProtocolError> {
        if theirs.is_zero() {
            return Err(ProtocolError::InvalidHandshake(
                "ack carries reserved channel 0",
            ));
        }
        match self.state {
            ProtocolState::Handshaking => {
                self.learn_remote_id(theirs);
                self.state = ProtocolState::Ready;
                Ok(true)
            }
            ProtocolState::Ready => {
                self.learn_remote_id(theirs);
                Ok(false)
            }
            state => Err(ProtocolError::PrematureMessage {
                state,
                what: "handshake-ack",
            }),
        }
    }

    /// Inbound availability announcement. Only meaningful once Ready.
    pub(crate) fn on_have(&self, start: ChunkId, end: ChunkId) -> Result<(), ProtocolError> {
        if self.state != ProtocolState::Ready {
            return Err(ProtocolError::PrematureMessage {
                state: self.state,
                what: "have",
            });
        }
        tracing::trace!(
            remote = %self.remote,
            channel = %self.local_id,
            start = %start,
            end = %end,
            "have"
        );
        Ok(())
    }

    /// Outbound availability announcement.
    pub(crate) fn have(&self, start: ChunkId, end: ChunkId) -> Result<Datagram, ProtocolError> {
        match (self.state, self.remote_id) {
            (ProtocolState::Ready, Some(theirs)) => {
                Ok(Datagram::new(theirs, vec![Msg::Have { start, end }]))
            }
            (state, _) => Err(ProtocolError::PrematureMessage { state, what: "have" }),
        }
    }

    /// Close to send for a local close request. `None` while the peer's id is
    /// still unknown: there is nothing to address it to.
    pub(crate) fn close_datagram(&self) -> Option<Datagram> {
        self.remote_id
            .map(|theirs| Datagram::new(theirs, vec![Msg::Close]))
    }

    /// Local close committed: → Closing.
    pub(crate) fn begin_closing(&mut self) {
        self.state = ProtocolState::Closing;
    }

    pub(crate) fn set_close_timer(&mut self, timer: AbortHandle) {
        if let Some(old) = self.close_timer.replace(timer) {
            old.abort();
        }
    }

    /// Terminal transition. Cancels a pending linger timer.
    pub(crate) fn finish(&mut self) {
        self.state = ProtocolState::Gone;
        if let Some(timer) = self.close_timer.take() {
            timer.abort();
        }
    }
}
