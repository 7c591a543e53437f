//! Error handling path tests for mssql-client.
//!
//! Tests for error display, conversion and categorization through the
//! public API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mssql_client::{Error, ErrorKind, SessionState};
use mssql_codec::CodecError;
use tds_protocol::ProtocolError;

fn make_server_error(number: i32, class: u8, message: &str) -> Error {
    Error::Server {
        number,
        class,
        state: 1,
        message: message.into(),
        server: None,
        procedure: None,
        line: 1,
    }
}

// =============================================================================
// Error Display Tests
// =============================================================================

#[test]
fn test_server_error_display() {
    let err = Error::Server {
        number: 8134,
        class: 16,
        state: 1,
        message: "Divide by zero error encountered.".into(),
        server: Some("SQLSERVER01".into()),
        procedure: Some("sp_calculate".into()),
        line: 42,
    };
    let msg = err.to_string();
    assert!(msg.contains("8134"));
    assert!(msg.contains("Divide by zero"));
}

#[test]
fn test_authentication_error_display() {
    let err = Error::Authentication {
        number: 18456,
        state: 1,
        class: 14,
        message: "Login failed for user 'sa'.".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("authentication failed"));
    assert!(msg.contains("18456"));
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState {
        operation: "execute",
        state: SessionState::Closed,
    };
    assert_eq!(err.to_string(), "cannot execute while session is closed");
}

#[test]
fn test_timeout_errors_display() {
    assert_eq!(Error::ConnectTimeout.to_string(), "connection timed out");
    assert_eq!(Error::CommandTimeout.to_string(), "command timed out");
    assert_eq!(Error::Cancelled.to_string(), "request cancelled");
}

#[test]
fn test_config_error_display() {
    let err = Error::Config("host must not be empty".into());
    let msg = err.to_string();
    assert!(msg.contains("configuration error"));
    assert!(msg.contains("host must not be empty"));
}

// =============================================================================
// Conversion Tests
// =============================================================================

#[test]
fn test_io_error_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    let err: Error = io_err.into();
    assert!(matches!(err, Error::Io(_)));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("reset"));
}

#[test]
fn test_codec_io_error_unwraps() {
    let codec = CodecError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "eof",
    ));
    assert!(matches!(Error::from(codec), Error::Io(_)));
}

#[test]
fn test_framing_errors_are_fatal() {
    let gap = Error::from(CodecError::SequenceGap {
        expected: 2,
        actual: 4,
    });
    assert!(matches!(gap, Error::Framing(_)));
    assert!(gap.is_fatal());
    assert_eq!(gap.kind(), ErrorKind::Operational);
}

#[test]
fn test_protocol_error_conversion() {
    let err = Error::from(ProtocolError::UnknownToken(0x42));
    assert!(matches!(err, Error::ProtocolViolation(_)));
    assert!(err.is_fatal());
    assert_eq!(err.kind(), ErrorKind::Interface);
}

// =============================================================================
// Categorization Tests
// =============================================================================

#[test]
fn test_syntax_and_object_errors_are_programming() {
    for (number, message) in [
        (102, "Incorrect syntax near 'FORM'."),
        (207, "Invalid column name 'nmae'."),
        (208, "Invalid object name 'dbo.missing'."),
        (2812, "Could not find stored procedure 'sp_nope'."),
        (4104, "The multi-part identifier could not be bound."),
    ] {
        let err = make_server_error(number, 16, message);
        assert_eq!(err.kind(), ErrorKind::Programming, "error {number}");
        assert!(!err.is_fatal());
    }
}

#[test]
fn test_constraint_errors_are_integrity() {
    for number in [515, 547, 2601, 2627] {
        let err = make_server_error(number, 16, "constraint");
        assert_eq!(err.kind(), ErrorKind::Integrity, "error {number}");
    }
}

#[test]
fn test_other_server_errors_are_operational() {
    let deadlock = make_server_error(1205, 13, "Transaction was deadlocked");
    assert_eq!(deadlock.kind(), ErrorKind::Operational);
    assert_eq!(deadlock.class(), Some(13));
}

#[test]
fn test_misuse_is_interface_error() {
    let err = Error::InvalidState {
        operation: "commit",
        state: SessionState::Errored,
    };
    assert_eq!(err.kind(), ErrorKind::Interface);
    assert!(!err.is_fatal());
    assert_eq!(err.number(), None);
}
