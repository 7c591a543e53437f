//! Type codec error types.

use thiserror::Error;

/// Errors raised while reading, decoding or encoding SQL Server values.
#[derive(Debug, Error)]
pub enum TypeError {
    /// The wire buffer ended before the value did.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A region that should have been consumed exactly still has bytes left.
    #[error("{remaining} unconsumed bytes after value")]
    TrailingBytes {
        /// Bytes left over.
        remaining: usize,
    },

    /// Type id not known to the codec.
    #[error("unsupported TDS type 0x{0:02X}")]
    UnsupportedType(u8),

    /// A length prefix that is not valid for the type.
    #[error("invalid length {length} for {type_name}")]
    InvalidLength {
        /// SQL type name.
        type_name: &'static str,
        /// Offending length.
        length: usize,
    },

    /// The value does not match the declared type descriptor.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// Value is out of range for the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Encoding the value would lose data.
    #[error("value truncated: {0}")]
    Truncation(String),

    /// Invalid encoding in string data.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Unsupported conversion to a Rust type.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: String,
        /// Target type.
        to: &'static str,
    },
}

impl TypeError {
    /// Whether this error was raised because a bound value does not fit its
    /// declared descriptor.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. } | Self::OutOfRange { .. } | Self::Truncation(_)
        )
    }

    /// Whether a well-framed value could not be represented in Rust.
    ///
    /// The bytes of the value were consumed exactly, so the surrounding
    /// stream is still in step.
    #[must_use]
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::InvalidEncoding(_) | Self::InvalidDateTime(_)
        )
    }
}
