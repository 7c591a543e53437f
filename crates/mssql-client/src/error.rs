//! Client error types.

use mssql_codec::CodecError;
use mssql_types::TypeError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::state::SessionState;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed packet header, packet sequence gap or end of stream inside
    /// a message. The session is unusable afterwards.
    #[error("framing error: {0}")]
    Framing(#[source] CodecError),

    /// The server rejected the login, or login ended without LOGINACK.
    #[error("authentication failed ({number}): {message}")]
    Authentication {
        /// Error number, 18456 for a failed SQL login.
        number: i32,
        /// Error state.
        state: u8,
        /// Error class/severity.
        class: u8,
        /// Error message.
        message: String,
    },

    /// The server returned an error for the current request.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number in the SQL batch or procedure.
        line: u32,
    },

    /// A bound parameter does not fit its declared type. Nothing was sent.
    #[error("type mismatch: {0}")]
    TypeMismatch(#[source] TypeError),

    /// A well-framed value in the response has no Rust representation.
    /// The response was read in full and the rest of it discarded; the
    /// session stays ready.
    #[error("conversion error: {0}")]
    Conversion(#[source] TypeError),

    /// The response violates the token stream grammar. The session is
    /// unusable afterwards.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[source] ProtocolError),

    /// Transport I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection timeout occurred.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Command execution timeout occurred.
    #[error("command timed out")]
    CommandTimeout,

    /// The request was cancelled with an attention signal. The session is
    /// ready for the next request.
    #[error("request cancelled")]
    Cancelled,

    /// The server's pre-login response demands transport encryption.
    #[error("server requires encryption")]
    EncryptionRequired,

    /// The operation is not valid in the session's current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// DB-API style error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid SQL, unknown objects or bad parameter types.
    Programming,
    /// Constraint violations.
    Integrity,
    /// Server, transport and login failures.
    Operational,
    /// Misuse of the driver or a broken protocol exchange.
    Interface,
}

impl Error {
    pub(crate) fn server(msg: ServerMessage) -> Self {
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message,
            server: Some(msg.server).filter(|s| !s.is_empty()),
            procedure: Some(msg.procedure).filter(|s| !s.is_empty()),
            line: u32::try_from(msg.line).unwrap_or(0),
        }
    }

    pub(crate) fn authentication(msg: ServerMessage) -> Self {
        Self::Authentication {
            number: msg.number,
            state: msg.state,
            class: msg.class,
            message: msg.message,
        }
    }

    /// Map a request encoding failure: values that do not fit their
    /// descriptor are [`Error::TypeMismatch`].
    pub(crate) fn encode(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Type(e) if e.is_mismatch() => Self::TypeMismatch(e),
            other => Self::ProtocolViolation(other),
        }
    }

    /// Map a response decoding failure: values that were framed correctly
    /// but cannot be represented are [`Error::Conversion`].
    pub(crate) fn decode(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Type(e) if e.is_value_error() => Self::Conversion(e),
            other => Self::ProtocolViolation(other),
        }
    }

    /// Check whether the session can no longer be used after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing(_)
                | Self::ProtocolViolation(_)
                | Self::Io(_)
                | Self::ConnectTimeout
                | Self::CommandTimeout
                | Self::EncryptionRequired
                | Self::Authentication { .. }
        )
    }

    /// Check if the server reported this error for the current request.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Server error number, for server and authentication errors.
    #[must_use]
    pub fn number(&self) -> Option<i32> {
        match self {
            Self::Server { number, .. } | Self::Authentication { number, .. } => Some(*number),
            _ => None,
        }
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } | Self::Authentication { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// DB-API style category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Server { number, .. } => match number {
                102 | 207 | 208 | 2812 | 4104 => ErrorKind::Programming,
                515 | 547 | 2601 | 2627 => ErrorKind::Integrity,
                _ => ErrorKind::Operational,
            },
            Self::TypeMismatch(_) => ErrorKind::Programming,
            Self::Authentication { .. }
            | Self::Framing(_)
            | Self::Io(_)
            | Self::ConnectTimeout
            | Self::CommandTimeout
            | Self::Cancelled
            | Self::Conversion(_)
            | Self::EncryptionRequired => ErrorKind::Operational,
            Self::ProtocolViolation(_) | Self::InvalidState { .. } | Self::Config(_) => {
                ErrorKind::Interface
            }
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::ProtocolViolation(e),
            other => Self::Framing(other),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::ProtocolViolation(err)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
