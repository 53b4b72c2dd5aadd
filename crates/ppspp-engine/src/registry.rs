//! Swarm/channel registry. Sole owner of every channel.
//!
//! Two indexes over one table:
//! - by local id: every channel that still holds its id (live and Closing)
//! - by (swarm, remote): live channels only, at most one per pair
//!
//! Not synchronized; the protocol facade keeps it behind a single lock.

use std::collections::{HashMap, HashSet};

use ppspp_core::{ChannelId, PeerId, SwarmId};

use crate::channel::{Channel, ChannelSnapshot, ProtocolState};
use crate::error::ProtocolError;

#[derive(Debug)]
pub struct Registry {
    swarms: HashSet<SwarmId>,
    channels: HashMap<ChannelId, Channel>,
    by_peer: HashMap<(SwarmId, PeerId), ChannelId>,
    next_id: u32,
    next_epoch: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Registry whose first allocation tries `first_id`.
    pub fn starting_at(first_id: u32) -> Self {
        Self {
            swarms: HashSet::new(),
            channels: HashMap::new(),
            by_peer: HashMap::new(),
            next_id: first_id,
            next_epoch: 1,
        }
    }

    // ── Swarms ───────────────────────────────────────────────────────────────

    /// Register local interest in a swarm. Idempotent.
    pub fn add_swarm(&mut self, swarm: SwarmId) -> bool {
        self.swarms.insert(swarm)
    }

    pub fn has_swarm(&self, swarm: SwarmId) -> bool {
        self.swarms.contains(&swarm)
    }

    pub fn swarms(&self) -> Vec<SwarmId> {
        let mut out: Vec<_> = self.swarms.iter().copied().collect();
        out.sort();
        out
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Live channel for the pair, if any.
    pub fn lookup_by_peer(&self, swarm: SwarmId, remote: &PeerId) -> Option<&Channel> {
        let id = self.by_peer.get(&(swarm, remote.clone()))?;
        self.channels.get(id)
    }

    pub(crate) fn lookup_by_peer_mut(
        &mut self,
        swarm: SwarmId,
        remote: &PeerId,
    ) -> Option<&mut Channel> {
        let id = self.by_peer.get(&(swarm, remote.clone()))?;
        self.channels.get_mut(id)
    }

    /// Channel holding `id`, including one that is Closing.
    pub fn lookup_by_local_id(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Same channel instance as when `epoch` was observed.
    pub(crate) fn lookup_epoch_mut(&mut self, id: ChannelId, epoch: u64) -> Option<&mut Channel> {
        self.channels.get_mut(&id).filter(|c| c.epoch() == epoch)
    }

    // ── Allocation ───────────────────────────────────────────────────────────

    /// Reserve a fresh local id for a new channel with `remote` on `swarm`.
    pub fn allocate(&mut self, swarm: SwarmId, remote: &PeerId) -> Result<ChannelId, ProtocolError> {
        self.allocate_channel(swarm, remote).map(|c| c.local_id())
    }

    /// As [`Registry::allocate`], returning the new channel (state Unknown).
    pub(crate) fn allocate_channel(
        &mut self,
        swarm: SwarmId,
        remote: &PeerId,
    ) -> Result<&mut Channel, ProtocolError> {
        let key = (swarm, remote.clone());
        if self.by_peer.contains_key(&key) {
            return Err(ProtocolError::DuplicateChannel {
                swarm,
                remote: remote.clone(),
            });
        }
        let id = self.fresh_id();
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        self.by_peer.insert(key, id);
        let channel = self
            .channels
            .entry(id)
            .or_insert_with(|| Channel::new(swarm, remote.clone(), id, epoch));
        Ok(channel)
    }

    /// Monotonic counter with wraparound; skips 0 and every id still held,
    /// Closing channels included.
    fn fresh_id(&mut self) -> ChannelId {
        loop {
            let candidate = ChannelId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !candidate.is_zero() && !self.channels.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Free the pair slot but keep the id reserved. Returns false if `id` is
    /// unknown or not live.
    pub fn begin_close(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channels.get_mut(&id) else {
            return false;
        };
        if !channel.state().is_live() {
            return false;
        }
        channel.begin_closing();
        let key = (channel.swarm(), channel.remote().clone());
        if self.by_peer.get(&key) == Some(&id) {
            self.by_peer.remove(&key);
        }
        true
    }

    /// Move the channel to Gone and free its id and slot. No-op for unknown ids.
    pub fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let mut channel = self.channels.remove(&id)?;
        let key = (channel.swarm(), channel.remote().clone());
        if self.by_peer.get(&key) == Some(&id) {
            self.by_peer.remove(&key);
        }
        channel.finish();
        Some(channel)
    }

    // ── Diagnostics ──────────────────────────────────────────────────────────

    /// Channels holding an id, Closing ones included.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Snapshot of every live channel, ordered by local id.
    pub fn live_channels(&self) -> Vec<ChannelSnapshot> {
        let mut out: Vec<_> = self
            .channels
            .values()
            .filter(|c| c.state().is_live())
            .map(Channel::snapshot)
            .collect();
        out.sort_by_key(|c| c.local_id);
        out
    }

    pub fn count_in_state(&self, state: ProtocolState) -> usize {
        self.channels.values().filter(|c| c.state() == state).count()
    }
}
