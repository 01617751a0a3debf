//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding packets and messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Packet type byte is not one of the known packet types.
    #[error("wrong packet type: {0}")]
    WrongPacketType(u8),
    /// Packet body is larger than the allowed maximum.
    #[error("packet size exceed: {size} bytes (max {max})")]
    PacketSizeExceed {
        /// Body length in bytes.
        size: usize,
        /// Configured maximum body length.
        max: usize,
    },
    /// Message type bits are not one of the known message types.
    #[error("wrong message type: {0}")]
    WrongMessageType(u8),
    /// Route does not fit the one-byte length prefix.
    #[error("route too long: {0} bytes (max 255)")]
    RouteTooLong(usize),
    /// Message bytes are truncated or otherwise malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// I/O failure surfaced through a framed reader.
    #[error("codec i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_packet_type_display() {
        let err = CodecError::WrongPacketType(9);
        assert_eq!(err.to_string(), "wrong packet type: 9");
    }

    #[test]
    fn packet_size_display() {
        let err = CodecError::PacketSizeExceed {
            size: 70_000,
            max: 65_536,
        };
        assert!(err.to_string().contains("70000"));
        assert!(err.to_string().contains("65536"));
    }

    #[test]
    fn io_error_from_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: CodecError = io.into();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
