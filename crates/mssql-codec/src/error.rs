//! Framing errors.

use tds_protocol::ProtocolError;
use tds_protocol::packet::PacketType;
use thiserror::Error;

/// Errors raised while framing TDS packets over a transport.
///
/// Every variant except [`CodecError::Io`] describes a stream the peer has
/// desynchronized; the connection cannot be reused after one.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// A packet header declared a length smaller than the header itself.
    #[error("invalid packet header")]
    InvalidHeader,

    /// A packet arrived with an unexpected packet number: not 1 at the
    /// start of a message, or not its predecessor's number plus one.
    #[error("packet sequence gap: expected packet {expected}, got {actual}")]
    SequenceGap {
        /// Packet number that should have followed.
        expected: u8,
        /// Packet number received.
        actual: u8,
    },

    /// A continuation packet changed the message type.
    #[error("packet type changed within a message: started as {expected:?}, got {actual:?}")]
    PacketTypeMismatch {
        /// Type of the message's first packet.
        expected: PacketType,
        /// Type of the offending packet.
        actual: PacketType,
    },

    /// The transport reached end of stream in the middle of a message.
    #[error("unexpected end of stream inside a message")]
    UnexpectedEof,

    /// A packet exceeds the maximum accepted packet size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared or requested packet size.
        size: usize,
        /// Largest accepted size.
        max: usize,
    },

    /// The peer closed the connection between messages.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or token bytes that do not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
