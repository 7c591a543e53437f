//! Low-level encoding helpers shared by the request encoders.
//!
//! Decoding goes through [`mssql_types::WireCursor`], which owns all
//! read-side bounds checking.

use bytes::BufMut;

use crate::error::ProtocolError;

/// Total length of the ALL_HEADERS block with one transaction descriptor.
pub const ALL_HEADERS_LENGTH: u32 = 22;

/// Length of the transaction descriptor header inside ALL_HEADERS.
const TRANSACTION_HEADER_LENGTH: u32 = 18;

/// Header type of the transaction descriptor header.
const TRANSACTION_HEADER_TYPE: u16 = 2;

/// Write the ALL_HEADERS prefix carried by SQL batch, RPC and transaction
/// manager requests.
pub fn write_all_headers(dst: &mut impl BufMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LENGTH);
    dst.put_u32_le(TRANSACTION_HEADER_LENGTH);
    dst.put_u16_le(TRANSACTION_HEADER_TYPE);
    dst.put_u64_le(transaction_descriptor);
    // Outstanding request count.
    dst.put_u32_le(1);
}

/// Number of UTF-16 code units in a string.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Write a UTF-16LE string without length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Write a length-prefixed UTF-16LE string (1-byte length in characters).
pub fn write_b_varchar(
    dst: &mut impl BufMut,
    field: &'static str,
    s: &str,
) -> Result<(), ProtocolError> {
    let length = utf16_len(s);
    let len = u8::try_from(length).map_err(|_| ProtocolError::StringTooLong { field, length })?;
    dst.put_u8(len);
    write_utf16_string(dst, s);
    Ok(())
}

/// Write a length-prefixed UTF-16LE string (2-byte length in characters).
pub fn write_us_varchar(
    dst: &mut impl BufMut,
    field: &'static str,
    s: &str,
) -> Result<(), ProtocolError> {
    let length = utf16_len(s);
    let len = u16::try_from(length).map_err(|_| ProtocolError::StringTooLong { field, length })?;
    dst.put_u16_le(len);
    write_utf16_string(dst, s);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use mssql_types::WireCursor;

    #[test]
    fn test_b_varchar_roundtrip() {
        let original = "Hello, 世界!";
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, "name", original).unwrap();

        let mut cursor = WireCursor::new(buf.freeze());
        assert_eq!(cursor.read_b_varchar().unwrap(), original);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_us_varchar_roundtrip() {
        let original = "Test string with Unicode: αβγ";
        let mut buf = BytesMut::new();
        write_us_varchar(&mut buf, "text", original).unwrap();

        let mut cursor = WireCursor::new(buf.freeze());
        assert_eq!(cursor.read_us_varchar().unwrap(), original);
    }

    #[test]
    fn test_b_varchar_rejects_overlong() {
        let mut buf = BytesMut::new();
        let err = write_b_varchar(&mut buf, "name", &"x".repeat(256)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::StringTooLong { field: "name", length: 256 }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_all_headers_layout() {
        let mut buf = BytesMut::new();
        write_all_headers(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(buf.len(), ALL_HEADERS_LENGTH as usize);
        assert_eq!(
            &buf[..],
            &[
                22, 0, 0, 0, 18, 0, 0, 0, 2, 0, 8, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0
            ]
        );
    }

    #[test]
    fn test_utf16_len_counts_surrogates() {
        assert_eq!(utf16_len("Hello"), 5);
        assert_eq!(utf16_len("😀"), 2);
    }
}
