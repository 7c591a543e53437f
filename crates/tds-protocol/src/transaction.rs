//! Transaction manager request encoding.
//!
//! Transaction manager requests (packet type 0x0E) begin, commit and roll
//! back transactions without going through T-SQL. The server answers with
//! ENVCHANGE tokens carrying the transaction descriptor.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{ALL_HEADERS_LENGTH, write_all_headers};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted = 1,
    /// Read committed (default for SQL Server).
    #[default]
    ReadCommitted = 2,
    /// Repeatable read.
    RepeatableRead = 3,
    /// Serializable (highest isolation).
    Serializable = 4,
    /// Snapshot isolation; requires snapshot isolation on the database.
    Snapshot = 5,
}

impl IsolationLevel {
    /// Get the isolation level name as used in SQL Server.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// Transaction manager request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRequest {
    /// TM_BEGIN_XACT with an isolation level.
    Begin(IsolationLevel),
    /// TM_COMMIT_XACT.
    Commit,
    /// TM_ROLLBACK_XACT.
    Rollback,
}

impl TransactionRequest {
    /// Request type code on the wire.
    #[must_use]
    pub const fn request_type(&self) -> u16 {
        match self {
            Self::Begin(_) => 5,
            Self::Commit => 7,
            Self::Rollback => 8,
        }
    }

    /// Encode the request payload.
    ///
    /// BEGIN carries the isolation level and an empty transaction name.
    /// COMMIT and ROLLBACK carry an empty name and a cleared
    /// "begin a new transaction" flag.
    #[must_use]
    pub fn encode(&self, transaction_descriptor: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_LENGTH as usize + 5);
        write_all_headers(&mut buf, transaction_descriptor);
        buf.put_u16_le(self.request_type());
        match self {
            Self::Begin(level) => {
                buf.put_u8(*level as u8);
                buf.put_u8(0);
            }
            Self::Commit | Self::Rollback => {
                buf.put_u8(0);
                buf.put_u8(0);
            }
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_payload() {
        let payload = TransactionRequest::Begin(IsolationLevel::Serializable).encode(0);
        assert_eq!(payload.len(), 26);
        assert_eq!(&payload[22..], &[5, 0, 4, 0]);
    }

    #[test]
    fn test_commit_carries_descriptor() {
        let payload = TransactionRequest::Commit.encode(0x1122_3344_5566_7788);
        assert_eq!(&payload[10..18], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&payload[22..], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_rollback_payload() {
        let payload = TransactionRequest::Rollback.encode(1);
        assert_eq!(&payload[22..], &[8, 0, 0, 0]);
    }
}
