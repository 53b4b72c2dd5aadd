//! ppspp-engine — channel negotiation, lifecycle and datagram dispatch.
//!
//! The engine is transport-agnostic: it talks to the network only through the
//! [`Transport`] trait. Two transports ship with it, an in-process
//! [`MemoryNetwork`] for deterministic tests and a tokio [`UdpTransport`].

pub mod channel;
pub mod engine;
pub mod error;
pub mod memory;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod stub;
pub mod transport;
pub mod udp;

pub use channel::{Channel, ChannelSnapshot, ProtocolState};
pub use engine::ChannelEngine;
pub use error::ProtocolError;
pub use memory::{Delivery, MemoryNetwork, MemoryTransport};
pub use peer::Peer;
pub use protocol::{HaveSink, LogHaveSink, Protocol};
pub use registry::Registry;
pub use stub::StubEngine;
pub use transport::{Address, DatagramHandler, Transport, TransportError};
pub use udp::{peer_id_for, UdpTransport};
