//! Protocol-level error types.

use mssql_types::TypeError;
use thiserror::Error;

/// Errors raised while encoding requests or decoding server responses.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes for a fixed-size structure.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Data ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status with undefined bits set.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Packet header declares a length shorter than the header itself.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(u16),

    /// Unknown pre-login option.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Token byte whose length convention is unknown.
    #[error("unknown token type: 0x{0:02X}")]
    UnknownToken(u8),

    /// Token body that violates its own layout.
    #[error("malformed {token} token: {reason}")]
    MalformedToken {
        /// Token name.
        token: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// ROW or NBCROW without an active COLMETADATA.
    #[error("row token received without column metadata")]
    RowWithoutMetadata,

    /// A string does not fit its length prefix.
    #[error("string too long for {field}: {length} characters")]
    StringTooLong {
        /// Field being encoded.
        field: &'static str,
        /// UTF-16 length of the string.
        length: usize,
    },

    /// Value or descriptor error from the type codec.
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ProtocolError {
    /// Check whether the error came from a truncated input.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Self::IncompletePacket { .. }
                | Self::UnexpectedEof
                | Self::Type(TypeError::BufferTooSmall { .. })
        )
    }
}
