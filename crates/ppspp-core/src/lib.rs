//! ppspp-core — identifiers, protocol messages, wire codec and configuration.
//! The engine and daemon crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{ChannelId, ChunkId, Datagram, Msg, PeerId, SwarmId};
pub use wire::WireError;
