//! SQL batch request encoding.
//!
//! A SQL batch (packet type 0x01) carries:
//! - ALL_HEADERS section with the transaction descriptor
//! - SQL text encoded as UTF-16LE

use bytes::{Bytes, BytesMut};

use crate::codec::{ALL_HEADERS_LENGTH, write_all_headers, write_utf16_string};

/// Encode a SQL batch request outside an explicit transaction.
///
/// ```
/// use tds_protocol::sql_batch::encode_sql_batch;
///
/// let payload = encode_sql_batch("SELECT 1");
/// assert_eq!(payload.len(), 22 + 16);
/// ```
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    encode_sql_batch_with_transaction(sql, 0)
}

/// Encode a SQL batch request with a transaction descriptor.
///
/// `transaction_descriptor` is the value the server returned in the
/// BeginTransaction ENVCHANGE, or 0 when no transaction is active.
#[must_use]
pub fn encode_sql_batch_with_transaction(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LENGTH as usize + sql.len() * 2);
    write_all_headers(&mut buf, transaction_descriptor);
    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_payload() {
        let payload = encode_sql_batch_with_transaction("SELECT 1", 0x0A);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(payload[10], 0x0A);
        assert_eq!(&payload[22..26], &[b'S', 0, b'E', 0]);
        assert_eq!(payload.len(), 22 + "SELECT 1".len() * 2);
    }

    #[test]
    fn test_batch_text_is_utf16() {
        let payload = encode_sql_batch("SELECT N'日本'");
        let text: Vec<u16> = payload[22..]
            .chunks(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(String::from_utf16(&text).ok().as_deref(), Some("SELECT N'日本'"));
    }
}
