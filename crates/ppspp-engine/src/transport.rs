//! Transport capability: what the engine needs from the network layer.
//!
//! The engine never opens sockets itself. A transport owns peer addressing,
//! connection state and raw datagram delivery; the engine hands it encoded
//! intent and receives inbound datagrams through a single callback.

use std::fmt;
use std::sync::Arc;

use ppspp_core::{Datagram, PeerId, WireError};

/// Opaque, transport-specific address (`127.0.0.1:7946`, `mem://3`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound callback. Invoked once per received datagram with the sender.
pub type DatagramHandler = Arc<dyn Fn(Datagram, PeerId) + Send + Sync>;

/// Network layer as seen by the engine.
///
/// Implementations must not hold internal locks while invoking the datagram
/// handler: the engine may send a reply from inside the callback.
pub trait Transport: Send + Sync {
    /// Local identity.
    fn identity(&self) -> PeerId;

    /// Locally reachable addresses.
    fn addresses(&self) -> Vec<Address>;

    /// Record how to reach `remote`.
    fn add_addresses(&self, remote: &PeerId, addrs: Vec<Address>);

    /// Open a connection to `remote`. Requires a known address.
    fn connect(&self, remote: &PeerId) -> Result<(), TransportError>;

    /// Tear down the connection to `remote`. Disconnecting an unconnected
    /// peer is not an error.
    fn disconnect(&self, remote: &PeerId) -> Result<(), TransportError>;

    /// Hand a datagram to the network. Fails with `NotConnected` when there is
    /// no active connection; never retries.
    fn send_datagram(&self, datagram: &Datagram, remote: &PeerId) -> Result<(), TransportError>;

    /// Register the engine-wide inbound handler. Only the first call takes
    /// effect.
    fn set_datagram_handler(&self, handler: DatagramHandler);
}

/// Errors surfaced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to {0}")]
    NotConnected(PeerId),

    #[error("no known address for {0}")]
    NoAddress(PeerId),

    #[error("peer {0} is not reachable on this network")]
    UnknownPeer(PeerId),

    #[error("invalid address {0}")]
    InvalidAddress(Address),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("transport is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
