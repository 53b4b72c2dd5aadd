//! PPSPP wire format: byte layout of messages and datagrams.
//!
//! This layout IS the interoperability contract. Every tag, every byte order
//! and the varint scheme are fixed; changing any of them breaks peers running
//! an older build.
//!
//! ```text
//! datagram         = channel:u32-be  message*
//! message          = tag:u8  payload
//! HandshakeRequest = 0x00  swarm:varint  channel:u32-be
//! Have             = 0x03  start:varint  end:varint
//! HandshakeAck     = 0x0d  channel:u32-be
//! Close            = 0x0e
//! varint           = unsigned LEB128, at most 10 bytes, value fits u64
//! ```
//!
//! Messages are self-delimiting, so a datagram carries no message count. An
//! empty message sequence encodes to zero bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::{ChannelId, ChunkId, Datagram, Msg, SwarmId};

// ── Constants ─────────────────────────────────────────────────────────────────

pub const TAG_HANDSHAKE_REQUEST: u8 = 0x00;
pub const TAG_HAVE: u8 = 0x03;
pub const TAG_HANDSHAKE_ACK: u8 = 0x0d;
pub const TAG_CLOSE: u8 = 0x0e;

/// Size of the channel identifier that prefixes every datagram.
pub const CHANNEL_HEADER_SIZE: usize = 4;

/// Largest datagram, header included. Matches the largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Longest valid varint encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when reading or writing wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed message at byte {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: Malformation },

    #[error("datagram of {0} bytes exceeds maximum {}", MAX_DATAGRAM_SIZE)]
    DatagramTooLarge(usize),
}

/// What exactly was wrong with a malformed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Malformation {
    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("varint overflows u64")]
    VarintOverflow,

    #[error("varint longer than {} bytes", MAX_VARINT_LEN)]
    VarintTooLong,
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode a message sequence. Deterministic: equal inputs give equal bytes.
pub fn encode(messages: &[Msg]) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::new();
    put_messages(&mut buf, messages);
    if buf.len() + CHANNEL_HEADER_SIZE > MAX_DATAGRAM_SIZE {
        return Err(WireError::DatagramTooLarge(buf.len() + CHANNEL_HEADER_SIZE));
    }
    Ok(buf.freeze())
}

fn put_messages(buf: &mut BytesMut, messages: &[Msg]) {
    for msg in messages {
        match msg {
            Msg::HandshakeRequest { swarm, channel } => {
                buf.put_u8(TAG_HANDSHAKE_REQUEST);
                put_varint(buf, swarm.0);
                buf.put_u32(channel.0);
            }
            Msg::Have { start, end } => {
                buf.put_u8(TAG_HAVE);
                put_varint(buf, start.0);
                put_varint(buf, end.0);
            }
            Msg::HandshakeAck { channel } => {
                buf.put_u8(TAG_HANDSHAKE_ACK);
                buf.put_u32(channel.0);
            }
            Msg::Close => buf.put_u8(TAG_CLOSE),
        }
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode a message sequence. Fails on the first unknown tag or truncated
/// payload; never skips bytes and never returns a partial sequence.
pub fn decode(bytes: &[u8]) -> Result<Vec<Msg>, WireError> {
    let mut reader = Reader::new(bytes, 0);
    let mut messages = Vec::new();
    while reader.buf.has_remaining() {
        messages.push(reader.message()?);
    }
    Ok(messages)
}

struct Reader<'a> {
    buf: &'a [u8],
    /// Offset of `buf[0]` within the enclosing datagram, for error reports.
    base: usize,
    len: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self {
            buf,
            base,
            len: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.base + self.len - self.buf.remaining()
    }

    fn malformed(&self, reason: Malformation) -> WireError {
        WireError::MalformedMessage {
            offset: self.offset(),
            reason,
        }
    }

    fn message(&mut self) -> Result<Msg, WireError> {
        let tag = self.u8("message tag")?;
        match tag {
            TAG_HANDSHAKE_REQUEST => {
                let swarm = SwarmId(self.varint("handshake swarm")?);
                let channel = ChannelId(self.u32("handshake channel")?);
                Ok(Msg::HandshakeRequest { swarm, channel })
            }
            TAG_HAVE => {
                let start = ChunkId(self.varint("have start")?);
                let end = ChunkId(self.varint("have end")?);
                Ok(Msg::Have { start, end })
            }
            TAG_HANDSHAKE_ACK => {
                let channel = ChannelId(self.u32("ack channel")?);
                Ok(Msg::HandshakeAck { channel })
            }
            TAG_CLOSE => Ok(Msg::Close),
            other => Err(WireError::MalformedMessage {
                offset: self.offset() - 1,
                reason: Malformation::UnknownTag(other),
            }),
        }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, WireError> {
        if !self.buf.has_remaining() {
            return Err(self.malformed(Malformation::Truncated(what)));
        }
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        if self.buf.remaining() < 4 {
            return Err(self.malformed(Malformation::Truncated(what)));
        }
        Ok(self.buf.get_u32())
    }

    fn varint(&mut self, what: &'static str) -> Result<u64, WireError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8(what)?;
            let low = u64::from(byte & 0x7f);
            // The tenth byte may only contribute the top bit of a u64.
            if i == MAX_VARINT_LEN - 1 && low > 1 {
                return Err(self.malformed(Malformation::VarintOverflow));
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.malformed(Malformation::VarintTooLong))
    }
}

// ── Datagram framing ──────────────────────────────────────────────────────────

/// Bundle messages for one channel into a datagram.
pub fn frame(channel: ChannelId, messages: Vec<Msg>) -> Datagram {
    Datagram { channel, messages }
}

/// Split a datagram back into its channel and messages.
pub fn unframe(datagram: Datagram) -> (ChannelId, Vec<Msg>) {
    (datagram.channel, datagram.messages)
}

impl Datagram {
    /// Serialize as `[channel: u32 big-endian][messages...]`.
    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(CHANNEL_HEADER_SIZE + 16);
        buf.put_u32(self.channel.0);
        put_messages(&mut buf, &self.messages);
        if buf.len() > MAX_DATAGRAM_SIZE {
            return Err(WireError::DatagramTooLarge(buf.len()));
        }
        Ok(buf.freeze())
    }

    /// Parse a full datagram. A buffer shorter than the channel header is
    /// malformed; a bare header is a datagram with no messages.
    pub fn from_bytes(bytes: &[u8]) -> Result<Datagram, WireError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(WireError::DatagramTooLarge(bytes.len()));
        }
        let mut header = Reader::new(bytes, 0);
        let channel = ChannelId(header.u32("channel header")?);

        let mut reader = Reader::new(&bytes[CHANNEL_HEADER_SIZE..], CHANNEL_HEADER_SIZE);
        let mut messages = Vec::new();
        while reader.buf.has_remaining() {
            messages.push(reader.message()?);
        }
        Ok(Datagram { channel, messages })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
