//! Message envelope carried inside `Data` packets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{CodecError, Result};

const ROUTE_COMPRESSED_MASK: u8 = 0x01;
const TYPE_MASK: u8 = 0x07;
const MAX_ROUTE_LEN: usize = 255;

/// Kind of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client request expecting a response.
    Request = 0,
    /// Client notification, no response.
    Notify = 1,
    /// Server response correlated by id.
    Response = 2,
    /// Server push addressed by route.
    Push = 3,
}

impl MessageType {
    /// Whether the envelope carries a message id.
    pub fn has_id(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Whether the envelope carries a route.
    pub fn has_route(self) -> bool {
        matches!(self, Self::Request | Self::Notify | Self::Push)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Notify),
            2 => Ok(Self::Response),
            3 => Ok(Self::Push),
            other => Err(CodecError::WrongMessageType(other)),
        }
    }
}

/// A message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Envelope kind.
    pub kind: MessageType,
    /// Correlation id (requests and responses only).
    pub id: u64,
    /// Route (requests, notifications and pushes only).
    pub route: String,
    /// Payload bytes.
    pub data: Bytes,
}

impl Message {
    /// Build a push envelope.
    pub fn push(route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Push,
            id: 0,
            route: route.into(),
            data: data.into(),
        }
    }

    /// Build a response envelope.
    pub fn response(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Response,
            id,
            route: String::new(),
            data: data.into(),
        }
    }

    /// Build a request envelope.
    pub fn request(id: u64, route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Request,
            id,
            route: route.into(),
            data: data.into(),
        }
    }

    /// Build a notify envelope.
    pub fn notify(route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Notify,
            id: 0,
            route: route.into(),
            data: data.into(),
        }
    }

    /// Encode the envelope.
    ///
    /// Routes are always written uncompressed.
    pub fn encode(&self) -> Result<Bytes> {
        let route = self.route.as_bytes();
        if self.kind.has_route() && route.len() > MAX_ROUTE_LEN {
            return Err(CodecError::RouteTooLong(route.len()));
        }

        let mut buf = BytesMut::with_capacity(1 + 10 + 1 + route.len() + self.data.len());
        buf.put_u8((self.kind as u8) << 1);

        if self.kind.has_id() {
            put_varint(&mut buf, self.id);
        }
        if self.kind.has_route() {
            buf.put_u8(route.len() as u8);
            buf.put_slice(route);
        }
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decode an envelope from a `Data` packet body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&flag, mut rest)) = data.split_first() else {
            return Err(CodecError::InvalidMessage("empty message".into()));
        };

        let kind = MessageType::try_from((flag >> 1) & TYPE_MASK)?;
        let mut id = 0;
        if kind.has_id() {
            let (value, used) = read_varint(rest)?;
            id = value;
            rest = &rest[used..];
        }

        let mut route = String::new();
        if kind.has_route() {
            if flag & ROUTE_COMPRESSED_MASK != 0 {
                return Err(CodecError::InvalidMessage(
                    "compressed routes are not supported".into(),
                ));
            }
            let Some((&len, tail)) = rest.split_first() else {
                return Err(CodecError::InvalidMessage("missing route length".into()));
            };
            let len = usize::from(len);
            if tail.len() < len {
                return Err(CodecError::InvalidMessage("truncated route".into()));
            }
            route = std::str::from_utf8(&tail[..len])
                .map_err(|e| CodecError::InvalidMessage(format!("route is not utf-8: {e}")))?
                .to_owned();
            rest = &tail[len..];
        }

        Ok(Self {
            kind,
            id,
            route,
            data: Bytes::copy_from_slice(rest),
        })
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn read_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        let shift = 7 * i as u32;
        if shift > 63 || (shift == 63 && byte & 0x7e != 0) {
            return Err(CodecError::InvalidMessage("message id overflow".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CodecError::InvalidMessage("truncated message id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn push_layout() {
        let bytes = Message::push("chat.msg", &b"hi"[..]).encode().unwrap();
        assert_eq!(bytes[0], 3 << 1);
        assert_eq!(bytes[1], 8);
        assert_eq!(&bytes[2..10], b"chat.msg");
        assert_eq!(&bytes[10..], b"hi");
    }

    #[test]
    fn response_has_id_and_no_route() {
        let bytes = Message::response(300, &b"ok"[..]).encode().unwrap();
        // 300 = 0b10_0101100 → [0xac, 0x02]
        assert_eq!(&bytes[..], &[2 << 1, 0xac, 0x02, b'o', b'k']);
    }

    #[test]
    fn request_decodes_id_route_and_data() {
        let encoded = Message::request(7, "room.join", &b"{}"[..]).encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.kind, MessageType::Request);
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.route, "room.join");
        assert_eq!(&decoded.data[..], b"{}");
    }

    #[test]
    fn notify_has_no_id() {
        let encoded = Message::notify("room.leave", Bytes::new()).encode().unwrap();
        assert_eq!(encoded[0], 1 << 1);
        assert_eq!(encoded[1], 10);
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.id, 0);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn large_ids_survive_varint() {
        let encoded = Message::response(u64::from(u32::MAX) + 5, Bytes::new())
            .encode()
            .unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.id, u64::from(u32::MAX) + 5);
    }

    #[test]
    fn max_id_survives_varint() {
        let encoded = Message::response(u64::MAX, Bytes::new()).encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap().id, u64::MAX);
    }

    #[test]
    fn tenth_id_byte_beyond_u64_rejected() {
        let mut frame = vec![2 << 1];
        frame.extend_from_slice(&[0xff; 9]);
        frame.push(0x02);
        assert_matches!(
            Message::decode(&frame),
            Err(CodecError::InvalidMessage(msg)) if msg.contains("overflow")
        );
    }

    #[test]
    fn route_too_long_rejected() {
        let route = "r".repeat(256);
        let err = Message::push(route, Bytes::new()).encode().unwrap_err();
        assert_matches!(err, CodecError::RouteTooLong(256));
    }

    #[test]
    fn decode_empty_is_invalid() {
        assert_matches!(Message::decode(&[]), Err(CodecError::InvalidMessage(_)));
    }

    #[test]
    fn decode_unknown_type() {
        assert_matches!(
            Message::decode(&[5 << 1]),
            Err(CodecError::WrongMessageType(5))
        );
    }

    #[test]
    fn decode_truncated_route() {
        assert_matches!(
            Message::decode(&[1 << 1, 4, b'a']),
            Err(CodecError::InvalidMessage(_))
        );
    }

    #[test]
    fn decode_truncated_id() {
        assert_matches!(
            Message::decode(&[0, 0x80]),
            Err(CodecError::InvalidMessage(_))
        );
    }

    #[test]
    fn decode_rejects_compressed_route() {
        assert_matches!(
            Message::decode(&[(1 << 1) | 1, 0, 1]),
            Err(CodecError::InvalidMessage(_))
        );
    }
}
