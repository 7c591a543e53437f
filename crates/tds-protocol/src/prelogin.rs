//! TDS pre-login packet handling.
//!
//! The pre-login packet is the first message exchanged between client and
//! server. It carries version information, the encryption capability, the
//! instance name and the client thread id.
//!
//! The payload is an option table of `(type, offset, length)` entries closed
//! by a terminator byte, followed by the option data. Offsets and lengths are
//! big-endian and offsets are absolute from the start of the payload.

use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::WireCursor;

use crate::error::ProtocolError;
use crate::version::ServerVersion;

/// Size of one option table entry.
const OPTION_ENTRY_SIZE: usize = 5;

/// Pre-login option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Thread ID.
    ThreadId = 0x03,
    /// MARS support.
    Mars = 0x04,
    /// Terminator (end of options).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value; options this client does not use yield `None`.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Version),
            0x01 => Some(Self::Encryption),
            0x02 => Some(Self::Instance),
            0x03 => Some(Self::ThreadId),
            0x04 => Some(Self::Mars),
            0xFF => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// Encryption level for connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption is available but off.
    Off = 0x00,
    /// Encryption is on.
    On = 0x01,
    /// Encryption is not supported.
    #[default]
    NotSupported = 0x02,
    /// Encryption is required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            _ => Err(ProtocolError::MalformedToken {
                token: "PRELOGIN",
                reason: format!("encryption level 0x{value:02X}"),
            }),
        }
    }

    /// Check if encryption is required.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Pre-login message builder and parser.
///
/// The same structure describes the client request and the server response.
/// The VERSION option carries the sender's product version in both
/// directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// Product version of the sender.
    pub version: ServerVersion,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name.
    pub instance: Option<String>,
    /// Client thread ID.
    pub thread_id: Option<u32>,
    /// MARS requested or granted.
    pub mars: bool,
}

impl PreLogin {
    /// Create a client pre-login that declares encryption as not supported.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: ServerVersion::from_raw(0x0001_0000, 0),
            encryption: EncryptionLevel::NotSupported,
            ..Self::default()
        }
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the client thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Encode the pre-login message to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut data = BytesMut::new();
        let mut entries = Vec::with_capacity(5);

        let start = data.len();
        data.put_u32(self.version.raw());
        data.put_u16_le(self.version.sub_build);
        mark(&mut entries, PreLoginOption::Version, start, &data);

        let start = data.len();
        data.put_u8(self.encryption as u8);
        mark(&mut entries, PreLoginOption::Encryption, start, &data);

        if let Some(instance) = &self.instance {
            let start = data.len();
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            mark(&mut entries, PreLoginOption::Instance, start, &data);
        }

        if let Some(thread_id) = self.thread_id {
            let start = data.len();
            data.put_u32(thread_id);
            mark(&mut entries, PreLoginOption::ThreadId, start, &data);
        }

        let start = data.len();
        data.put_u8(u8::from(self.mars));
        mark(&mut entries, PreLoginOption::Mars, start, &data);

        let table_size = entries.len() * OPTION_ENTRY_SIZE + 1;
        let mut buf = BytesMut::with_capacity(table_size + data.len());
        for (option, offset, length) in entries {
            buf.put_u8(option as u8);
            buf.put_u16((table_size + offset) as u16);
            buf.put_u16(length as u16);
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_slice(&data);
        buf.freeze()
    }

    /// Decode a pre-login message.
    ///
    /// Option entries pointing outside the payload are rejected. Options
    /// this client does not use are skipped.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut table = WireCursor::new(payload.clone());
        let mut options = Vec::new();
        loop {
            let option_type = table.read_u8()?;
            if option_type == PreLoginOption::Terminator as u8 {
                break;
            }
            let offset = usize::from(table.read_u16_be()?);
            let length = usize::from(table.read_u16_be()?);
            if offset + length > payload.len() {
                return Err(ProtocolError::MalformedToken {
                    token: "PRELOGIN",
                    reason: format!("option 0x{option_type:02X} points past the payload"),
                });
            }
            if let Some(option) = PreLoginOption::from_u8(option_type) {
                options.push((option, payload.slice(offset..offset + length)));
            }
        }

        let mut prelogin = Self::default();
        for (option, data) in options {
            let mut cursor = WireCursor::new(data.clone());
            match option {
                PreLoginOption::Version => {
                    let raw = cursor.read_u32_be()?;
                    let sub_build = if cursor.remaining() >= 2 {
                        cursor.read_u16_le()?
                    } else {
                        0
                    };
                    prelogin.version = ServerVersion::from_raw(raw, sub_build);
                }
                PreLoginOption::Encryption => {
                    prelogin.encryption = EncryptionLevel::from_u8(cursor.read_u8()?)?;
                }
                PreLoginOption::Instance => {
                    let name = data.split(|&b| b == 0).next().unwrap_or_default();
                    if !name.is_empty() {
                        prelogin.instance = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                PreLoginOption::ThreadId if !data.is_empty() => {
                    prelogin.thread_id = Some(cursor.read_u32_be()?);
                }
                PreLoginOption::Mars if !data.is_empty() => {
                    prelogin.mars = cursor.read_u8()? != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

/// Record an option entry covering `data[start..]`.
fn mark(
    entries: &mut Vec<(PreLoginOption, usize, usize)>,
    option: PreLoginOption,
    start: usize,
    data: &BytesMut,
) {
    entries.push((option, start, data.len() - start));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_prelogin_layout() {
        let encoded = PreLogin::new()
            .with_instance("MSSQLServer")
            .with_thread_id(0x0102_0304)
            .encode();

        // 5 entries + terminator
        assert_eq!(encoded[0], PreLoginOption::Version as u8);
        assert_eq!(&encoded[1..5], &[0, 26, 0, 6]);
        assert_eq!(&encoded[5..10], &[1, 0, 32, 0, 1]);
        assert_eq!(&encoded[10..15], &[2, 0, 33, 0, 12]);
        assert_eq!(&encoded[15..20], &[3, 0, 45, 0, 4]);
        assert_eq!(&encoded[20..25], &[4, 0, 49, 0, 1]);
        assert_eq!(encoded[25], 0xFF);
        // Encryption declared as not supported.
        assert_eq!(encoded[32], 0x02);
        assert_eq!(&encoded[33..45], b"MSSQLServer\0");
        assert_eq!(&encoded[45..49], &[1, 2, 3, 4]);
        assert_eq!(encoded[49], 0);
        assert_eq!(encoded.len(), 50);
    }

    #[test]
    fn test_prelogin_decode_roundtrip() {
        let original = PreLogin::new().with_instance("SQLEXPRESS").with_thread_id(42);
        let decoded = PreLogin::decode(original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_prelogin_decode_out_of_order_options() {
        let mut buf = BytesMut::new();
        let table_size: u16 = 11;
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(table_size);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(table_size + 1);
        buf.put_u16(6);
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_u8(0x02);
        buf.put_slice(&[0x10, 0x00, 0x0F, 0xA0]);
        buf.put_u16_le(0);

        let decoded = PreLogin::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
        assert_eq!(decoded.version.major, 16);
        assert_eq!(decoded.version.build, 4000);
    }

    #[test]
    fn test_prelogin_rejects_offset_past_end() {
        let raw = Bytes::from_static(&[0x01, 0x00, 0x06, 0x00, 0x05, 0xFF]);
        assert!(PreLogin::decode(raw).is_err());
    }

    #[test]
    fn test_prelogin_truncated_table() {
        let raw = Bytes::from_static(&[0x00, 0x00]);
        assert!(PreLogin::decode(raw).unwrap_err().is_truncation());
    }

    #[test]
    fn test_encryption_level() {
        assert!(EncryptionLevel::Required.is_required());
        assert!(EncryptionLevel::On.is_required());
        assert!(!EncryptionLevel::Off.is_required());
        assert!(!EncryptionLevel::NotSupported.is_required());
        assert!(EncryptionLevel::from_u8(0x80).is_err());
    }
}
