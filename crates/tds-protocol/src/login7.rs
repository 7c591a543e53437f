//! LOGIN7, the record that authenticates a session.
//!
//! A 94-byte fixed part holds scalars and, for each string, an
//! (offset, length in UTF-16 units) pair pointing into the variable part
//! that follows. Only SQL Server authentication is produced: the password
//! travels obfuscated, not encrypted.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_utf16_string};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed part.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Longest string, in UTF-16 code units, accepted for a LOGIN7 field.
pub const MAX_LOGIN_STRING: usize = 128;

bitflags! {
    /// OptionFlags1 (offset 24). Zero bits select little-endian integers,
    /// ASCII and IEEE floats.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Report database changes with ENVCHANGE.
        const USE_DB_NOTIFY = 0x20;
        /// Fail the login when the initial database is unusable.
        const INIT_DB_FATAL = 0x40;
        /// Report language changes with ENVCHANGE.
        const SET_LANG_ON = 0x80;
    }
}

bitflags! {
    /// OptionFlags2 (offset 25). Integrated security (0x80) is never set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Fail the login when the language cannot be set.
        const INIT_LANG_FATAL = 0x01;
        /// Client behaves like an ODBC driver.
        const ODBC = 0x02;
    }
}

bitflags! {
    /// OptionFlags3 (offset 27).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Accept collations the client does not know.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
    }
}

/// Login request.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Protocol version asked for.
    pub tds_version: TdsVersion,
    /// Packet size asked for; the server answers with an ENVCHANGE.
    pub packet_size: u32,
    /// Client process id, informational.
    pub client_pid: u32,
    /// Option byte at offset 24.
    pub flags1: OptionFlags1,
    /// Option byte at offset 25.
    pub flags2: OptionFlags2,
    /// Option byte at offset 27.
    pub flags3: OptionFlags3,
    /// Locale id, 0x0409 for en-US.
    pub lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password, scrambled on encode.
    pub password: String,
    /// Reported application.
    pub app_name: String,
    /// Server the client dialled.
    pub server_name: String,
    /// Reported client library.
    pub library_name: String,
    /// Initial language; empty for the server default.
    pub language: String,
    /// Initial database; empty for the login's default.
    pub database: String,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_pid: std::process::id(),
            flags1: OptionFlags1::all(),
            flags2: OptionFlags2::all(),
            flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("mssql-tds"),
            server_name: String::new(),
            library_name: String::from("mssql-tds"),
            language: String::new(),
            database: String::new(),
        }
    }
}

/// Variable part under construction, recording where each string lands.
struct VarData {
    bytes: BytesMut,
}

impl VarData {
    fn offset(&self) -> u16 {
        (LOGIN7_HEADER_SIZE + self.bytes.len()) as u16
    }

    /// Append a string and return its (offset, length) pair.
    fn push(
        &mut self,
        field: &'static str,
        value: &str,
        write: impl FnOnce(&mut BytesMut, &str),
    ) -> Result<(u16, u16), ProtocolError> {
        let length = utf16_len(value);
        if length > MAX_LOGIN_STRING {
            return Err(ProtocolError::StringTooLong { field, length });
        }
        let offset = self.offset();
        write(&mut self.bytes, value);
        Ok((offset, length as u16))
    }
}

impl Login7 {
    /// Request with default options and empty strings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL Server login name and password.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Server name as dialled.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Locale id.
    #[must_use]
    pub fn with_lcid(mut self, lcid: u32) -> Self {
        self.lcid = lcid;
        self
    }

    /// Serialize the record; a string longer than [`MAX_LOGIN_STRING`]
    /// UTF-16 units is an error.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let utf16 = |dst: &mut BytesMut, s: &str| write_utf16_string(dst, s);
        let mut var = VarData {
            bytes: BytesMut::new(),
        };
        // Offset table order: hostname through server name, a reserved
        // slot, then library, language and database.
        let leading = [
            var.push("hostname", &self.hostname, utf16)?,
            var.push("username", &self.username, utf16)?,
            var.push("password", &self.password, |dst, s| {
                dst.put_slice(&scramble_password(s));
            })?,
            var.push("app_name", &self.app_name, utf16)?,
            var.push("server_name", &self.server_name, utf16)?,
        ];
        let trailing = [
            var.push("library_name", &self.library_name, utf16)?,
            var.push("language", &self.language, utf16)?,
            var.push("database", &self.database, utf16)?,
        ];
        let end = var.offset();

        let total = LOGIN7_HEADER_SIZE + var.bytes.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(0); // client program version
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0); // connection id
        buf.put_u8(self.flags1.bits());
        buf.put_u8(self.flags2.bits());
        buf.put_u8(0); // type flags
        buf.put_u8(self.flags3.bits());
        buf.put_i32_le(0); // client time zone
        buf.put_u32_le(self.lcid);

        let mut put_pair = |(offset, length): (u16, u16)| {
            buf.put_u16_le(offset);
            buf.put_u16_le(length);
        };
        leading.into_iter().for_each(&mut put_pair);
        put_pair((0, 0));
        trailing.into_iter().for_each(&mut put_pair);
        buf.put_slice(&[0u8; 6]); // client id
        // SSPI, attach file and new password are empty.
        for _ in 0..3 {
            buf.put_u16_le(end);
            buf.put_u16_le(0);
        }
        buf.put_u32_le(0); // SSPI long length

        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        buf.put_slice(&var.bytes);
        Ok(buf.freeze())
    }
}

/// Obfuscate a password for LOGIN7.
///
/// Each byte of the UTF-16LE encoding has its nibbles swapped and is then
/// XORed with `0xA5`.
#[must_use]
pub fn scramble_password(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .map(|b| b.rotate_right(4) ^ 0xA5)
        .collect()
}
