//! Wire format.
//!
//! Two layers, encoded independently:
//!
//! | Layer | Type | Layout |
//! |-------|------|--------|
//! | Transport frame | [`Packet`] | `type:u8 \| length:u24be \| body` |
//! | Envelope | [`Message`] | `flag:u8 \| id:varint? \| route? \| data` |
//!
//! A `Data` packet body always carries one encoded [`Message`].

pub mod message;
pub mod packet;

pub use message::{Message, MessageType};
pub use packet::{HEADER_LEN, MAX_PACKET_SIZE, Packet, PacketCodec, PacketType};
