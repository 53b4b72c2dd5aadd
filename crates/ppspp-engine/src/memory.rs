//! In-process transport.
//!
//! Every endpoint registers with a shared [`MemoryNetwork`] hub. Delivery is
//! synchronous: `send_datagram` encodes, decodes on the receiving side and
//! invokes the receiver's handler before returning. Datagrams still go
//! through the wire codec so framing bugs surface here too.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::{DashMap, DashSet};

use ppspp_core::{Datagram, PeerId};

use crate::transport::{Address, DatagramHandler, Transport, TransportError};

/// One delivered (or deliberately lost) datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: PeerId,
    pub to: PeerId,
    pub datagram: Datagram,
    /// Encoded size including the channel header.
    pub size: usize,
    pub dropped: bool,
}

#[derive(Default)]
struct Hub {
    endpoints: DashMap<PeerId, Arc<Endpoint>>,
    by_addr: DashMap<Address, PeerId>,
    /// Endpoints whose inbound datagrams are silently lost.
    dropping: DashSet<PeerId>,
    traffic: Mutex<Vec<Delivery>>,
    next: AtomicU32,
}

struct Endpoint {
    id: PeerId,
    addr: Address,
    book: DashMap<PeerId, Vec<Address>>,
    connections: DashSet<PeerId>,
    handler: OnceLock<DatagramHandler>,
}

/// Shared in-process network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint, `mem-<n>` at `mem://<n>`.
    pub fn endpoint(&self) -> Arc<MemoryTransport> {
        let n = self.hub.next.fetch_add(1, Ordering::Relaxed) + 1;
        let endpoint = Arc::new(Endpoint {
            id: PeerId::new(format!("mem-{n}")),
            addr: Address::new(format!("mem://{n}")),
            book: DashMap::new(),
            connections: DashSet::new(),
            handler: OnceLock::new(),
        });
        self.hub
            .by_addr
            .insert(endpoint.addr.clone(), endpoint.id.clone());
        self.hub
            .endpoints
            .insert(endpoint.id.clone(), Arc::clone(&endpoint));
        tracing::debug!(peer = %endpoint.id, addr = %endpoint.addr, "memory endpoint registered");
        Arc::new(MemoryTransport {
            network: self.clone(),
            endpoint,
        })
    }

    /// Lose every datagram addressed to `peer` while `on` is set. Sends still
    /// succeed, as they would over UDP.
    pub fn set_dropping(&self, peer: &PeerId, on: bool) {
        if on {
            self.hub.dropping.insert(peer.clone());
        } else {
            self.hub.dropping.remove(peer);
        }
    }

    /// Drain the traffic log.
    pub fn take_traffic(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.hub.traffic.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Deliver `datagram` to `to` as if `from` had sent it, bypassing
    /// connection checks. Used to replay duplicated or reordered traffic.
    pub fn inject(&self, from: &PeerId, to: &PeerId, datagram: Datagram) -> Result<(), TransportError> {
        let target = self.lookup(to)?;
        deliver(&target, datagram, from.clone());
        Ok(())
    }

    fn lookup(&self, peer: &PeerId) -> Result<Arc<Endpoint>, TransportError> {
        self.hub
            .endpoints
            .get(peer)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))
    }

    fn record(&self, delivery: Delivery) {
        self.hub
            .traffic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery);
    }
}

/// Hand a datagram to an endpoint's handler. No hub locks are held here.
fn deliver(target: &Endpoint, datagram: Datagram, from: PeerId) {
    match target.handler.get() {
        Some(handler) => handler(datagram, from),
        None => tracing::trace!(to = %target.id, %from, "no handler registered, datagram discarded"),
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn is_connected(&self, remote: &PeerId) -> bool {
        self.endpoint.connections.contains(remote)
    }
}

impl Transport for MemoryTransport {
    fn identity(&self) -> PeerId {
        self.endpoint.id.clone()
    }

    fn addresses(&self) -> Vec<Address> {
        vec![self.endpoint.addr.clone()]
    }

    fn add_addresses(&self, remote: &PeerId, addrs: Vec<Address>) {
        let mut known = self.endpoint.book.entry(remote.clone()).or_default();
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    fn connect(&self, remote: &PeerId) -> Result<(), TransportError> {
        let addrs = self
            .endpoint
            .book
            .get(remote)
            .map(|a| a.value().clone())
            .ok_or_else(|| TransportError::NoAddress(remote.clone()))?;
        let reachable = addrs.iter().any(|addr| {
            self.network
                .hub
                .by_addr
                .get(addr)
                .is_some_and(|owner| owner.value() == remote)
        });
        if !reachable {
            return Err(TransportError::UnknownPeer(remote.clone()));
        }

        let target = self.network.lookup(remote)?;
        self.endpoint.connections.insert(remote.clone());
        target.connections.insert(self.endpoint.id.clone());
        tracing::debug!(peer = %self.endpoint.id, %remote, "memory connection established");
        Ok(())
    }

    fn disconnect(&self, remote: &PeerId) -> Result<(), TransportError> {
        self.endpoint.connections.remove(remote);
        if let Ok(target) = self.network.lookup(remote) {
            target.connections.remove(&self.endpoint.id);
        }
        tracing::debug!(peer = %self.endpoint.id, %remote, "memory connection closed");
        Ok(())
    }

    fn send_datagram(&self, datagram: &Datagram, remote: &PeerId) -> Result<(), TransportError> {
        if !self.endpoint.connections.contains(remote) {
            return Err(TransportError::NotConnected(remote.clone()));
        }
        let target = self.network.lookup(remote)?;

        let bytes = datagram.to_bytes()?;
        let received = Datagram::from_bytes(&bytes)?;
        let dropped = self.network.hub.dropping.contains(remote);
        self.network.record(Delivery {
            from: self.endpoint.id.clone(),
            to: remote.clone(),
            datagram: received.clone(),
            size: bytes.len(),
            dropped,
        });
        if dropped {
            tracing::trace!(from = %self.endpoint.id, to = %remote, "datagram lost");
            return Ok(());
        }

        deliver(&target, received, self.endpoint.id.clone());
        Ok(())
    }

    fn set_datagram_handler(&self, handler: DatagramHandler) {
        if self.endpoint.handler.set(handler).is_err() {
            tracing::warn!(peer = %self.endpoint.id, "datagram handler already set, ignoring");
        }
    }
}
