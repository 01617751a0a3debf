//! Transport packet framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{CodecError, Result};

/// Packet header length: one type byte plus a 24-bit big-endian body length.
pub const HEADER_LEN: usize = 4;

/// Default maximum packet body size (64 KiB).
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Kind of a transport packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client hello / server handshake response.
    Handshake = 1,
    /// Client acknowledgement of the handshake response.
    HandshakeAck = 2,
    /// Keep-alive, sent in both directions.
    Heartbeat = 3,
    /// Carries one encoded message envelope.
    Data = 4,
    /// Server-initiated disconnect.
    Kick = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Handshake),
            2 => Ok(Self::HandshakeAck),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::Data),
            5 => Ok(Self::Kick),
            other => Err(CodecError::WrongPacketType(other)),
        }
    }
}

/// A decoded transport packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketType,
    /// Raw body bytes.
    pub body: Bytes,
}

impl Packet {
    /// Create a packet.
    pub fn new(kind: PacketType, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }
}

/// Encode a single packet with the default size limit.
pub fn encode(kind: PacketType, body: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_LEN + body.len());
    write_packet(kind, body, MAX_PACKET_SIZE, &mut dst)?;
    Ok(dst.freeze())
}

fn write_packet(kind: PacketType, body: &[u8], max: usize, dst: &mut BytesMut) -> Result<()> {
    if body.len() > max {
        return Err(CodecError::PacketSizeExceed {
            size: body.len(),
            max,
        });
    }
    dst.reserve(HEADER_LEN + body.len());
    dst.put_u8(kind as u8);
    dst.put_uint(body.len() as u64, 3);
    dst.put_slice(body);
    Ok(())
}

/// Streaming packet codec.
///
/// Accepts arbitrarily split input and yields complete packets. Usable with
/// `FramedRead`/`FramedWrite` or by calling [`Decoder::decode`] on a buffer
/// directly.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_size: usize,
}

impl PacketCodec {
    /// Codec with the default 64 KiB body limit.
    pub fn new() -> Self {
        Self {
            max_size: MAX_PACKET_SIZE,
        }
    }

    /// Codec with a custom body limit.
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Maximum accepted body size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = PacketType::try_from(src[0])?;
        let size =
            (usize::from(src[1]) << 16) | (usize::from(src[2]) << 8) | usize::from(src[3]);
        if size > self.max_size {
            return Err(CodecError::PacketSizeExceed {
                size,
                max: self.max_size,
            });
        }

        if src.len() < HEADER_LEN + size {
            src.reserve(HEADER_LEN + size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(size).freeze();
        Ok(Some(Packet { kind, body }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        write_packet(item.kind, &item.body, self.max_size, dst)
    }
}
