//! Collation handling for single-byte and multi-byte character data.
//!
//! `CHAR`/`VARCHAR`/`TEXT` values arrive in the code page selected by the
//! column collation. The collation's LCID is mapped to an `encoding_rs`
//! encoding here so that the codec can turn raw bytes into text itself.
//!
//! | Code Page | Encoding | Languages |
//! |-----------|----------|-----------|
//! | 874 | Windows-874 | Thai |
//! | 932 | Shift_JIS | Japanese |
//! | 936 | GB18030 | Simplified Chinese |
//! | 949 | EUC-KR | Korean |
//! | 950 | Big5 | Traditional Chinese |
//! | 1250 | Windows-1250 | Central European |
//! | 1251 | Windows-1251 | Cyrillic |
//! | 1252 | Windows-1252 | Western European (default) |
//! | 1253 | Windows-1253 | Greek |
//! | 1254 | Windows-1254 | Turkish |
//! | 1255 | Windows-1255 | Hebrew |
//! | 1256 | Windows-1256 | Arabic |
//! | 1257 | Windows-1257 | Baltic |
//! | 1258 | Windows-1258 | Vietnamese |

use bytes::{BufMut, BytesMut};
use encoding_rs::Encoding;

use crate::cursor::WireCursor;
use crate::error::TypeError;

/// Flag bit indicating a UTF-8 collation (SQL Server 2019+).
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask extracting the primary language id from the collation info.
const PRIMARY_LANGUAGE_MASK: u32 = 0x0000_FFFF;

/// Wire size of a collation.
pub const COLLATION_SIZE: usize = 5;

/// SQL Server collation as carried in TYPE_INFO and ENVCHANGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// Collation info: LCID in the low 20 bits, comparison flags and
    /// version above.
    pub lcid: u32,
    /// SQL sort id.
    pub sort_id: u8,
}

impl Collation {
    /// `SQL_Latin1_General_CP1_CI_AS`.
    pub const LATIN1_GENERAL: Self = Self {
        lcid: 0x00D0_0409,
        sort_id: 0x34,
    };

    /// Create a collation from its parts.
    #[must_use]
    pub const fn new(lcid: u32, sort_id: u8) -> Self {
        Self { lcid, sort_id }
    }

    /// Read the 5-byte wire form.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, TypeError> {
        let lcid = cursor.read_u32_le()?;
        let sort_id = cursor.read_u8()?;
        Ok(Self { lcid, sort_id })
    }

    /// Write the 5-byte wire form.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.lcid);
        dst.put_u8(self.sort_id);
    }

    /// Whether this collation stores character data as UTF-8.
    #[must_use]
    pub fn is_utf8(&self) -> bool {
        is_utf8_collation(self.lcid)
    }

    /// Encoding used for character data under this collation.
    ///
    /// Unknown LCIDs fall back to Windows-1252.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.is_utf8() {
            return encoding_rs::UTF_8;
        }
        encoding_for_lcid(self.lcid).unwrap_or(encoding_rs::WINDOWS_1252)
    }

    /// Windows code page number of this collation.
    #[must_use]
    pub fn code_page(&self) -> u16 {
        code_page_for_lcid(self.lcid)
    }
}

/// Whether the collation info carries the UTF-8 flag.
#[inline]
#[must_use]
pub fn is_utf8_collation(lcid: u32) -> bool {
    lcid & COLLATION_FLAG_UTF8 != 0
}

/// Encoding for a given LCID, if the LCID is recognized.
///
/// UTF-8 collations return `None`; the caller does not need to transcode.
#[must_use]
pub fn encoding_for_lcid(lcid: u32) -> Option<&'static Encoding> {
    if is_utf8_collation(lcid) {
        return None;
    }
    let encoding = match code_page_for_lcid(lcid) {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GB18030,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        _ => encoding_rs::WINDOWS_1252,
    };
    Some(encoding)
}

/// Windows code page for an LCID. Unrecognized LCIDs map to 1252.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> u16 {
    if is_utf8_collation(lcid) {
        return 65001;
    }

    match lcid & PRIMARY_LANGUAGE_MASK {
        0x0411 => 932,
        0x0804 | 0x1004 => 936,
        0x0404 | 0x0C04 | 0x1404 => 950,
        0x0412 => 949,
        0x041E => 874,
        0x042A => 1258,

        // Central European
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424 | 0x0418
        | 0x041C => 1250,

        // Cyrillic
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843 | 0x0444
        | 0x0450 | 0x0485 => 1251,

        0x0408 => 1253,
        0x041F | 0x042C => 1254,
        0x040D => 1255,

        // Arabic, Farsi, Urdu
        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401 | 0x2801
        | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420 | 0x048C
        | 0x0463 => 1256,

        0x0425..=0x0427 => 1257,

        _ => 1252,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_detection() {
        assert!(is_utf8_collation(0x0800_0409));
        assert!(!is_utf8_collation(0x0409));
        assert_eq!(Collation::new(0x0800_0409, 0).encoding(), encoding_rs::UTF_8);
    }

    #[test]
    fn test_code_pages() {
        assert_eq!(code_page_for_lcid(0x0411), 932);
        assert_eq!(code_page_for_lcid(0x0419), 1251);
        assert_eq!(code_page_for_lcid(0x0401), 1256);
        assert_eq!(code_page_for_lcid(0x0426), 1257);
        assert_eq!(code_page_for_lcid(0x0800_0409), 65001);
    }

    #[test]
    fn test_unknown_lcid_falls_back_to_1252() {
        let collation = Collation::new(0x7FFF, 0);
        assert_eq!(collation.code_page(), 1252);
        assert_eq!(collation.encoding(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_lcid_with_flags_uses_primary_language() {
        // Latin1_General carries comparison flags above the LCID.
        assert_eq!(Collation::LATIN1_GENERAL.code_page(), 1252);
        assert_eq!(Collation::new(0x00D0_0419, 0).code_page(), 1251);
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut buf = BytesMut::new();
        Collation::LATIN1_GENERAL.encode(&mut buf);
        assert_eq!(&buf[..], &[0x09, 0x04, 0xD0, 0x00, 0x34]);

        let mut cursor = WireCursor::new(buf.freeze());
        assert_eq!(
            Collation::decode(&mut cursor).unwrap(),
            Collation::LATIN1_GENERAL
        );
    }

    #[test]
    fn test_decode_cyrillic_text() {
        let encoding = Collation::new(0x0419, 0).encoding();
        let (text, _, had_errors) = encoding.decode(&[0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2]);
        assert!(!had_errors);
        assert_eq!(text, "Привет");
    }
}
