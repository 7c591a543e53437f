//! TDS token stream decoding.
//!
//! Tokens are the units of a TDS response message. Each token begins with a
//! one-byte type identifier followed by data whose length convention depends
//! on the token: most carry a length prefix, DONE-family tokens are fixed
//! size, and ROW/NBCROW are sized by the active column metadata.
//!
//! [`TokenStream`] walks one reassembled response message and yields
//! [`Token`] values. It owns the active [`ColMetaData`] so that rows are
//! decoded against the result set that introduced them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tds_protocol::token::{Token, TokenStream};
//!
//! let mut stream = TokenStream::new(message);
//! while let Some(token) = stream.next_token()? {
//!     match token {
//!         Token::Row(values) => println!("{values:?}"),
//!         Token::Done(done) if !done.has_more() => break,
//!         Token::Error(err) => eprintln!("Error {}: {}", err.number, err.message),
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::{Collation, SqlValue, TypeId, TypeInfo, WireCursor, decode_value, encode_value};

use crate::codec::{write_b_varchar, write_us_varchar};
use crate::error::ProtocolError;
use crate::types::ColumnFlags;
use crate::version::{ServerVersion, TdsVersion};

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// SSPI authentication (SSPI).
    Sspi = 0xED,
    /// Done (DONE).
    Done = 0xFD,
    /// Done in procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Done procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Return value (RETURNVALUE).
    ReturnValue = 0xAC,
    /// Order (ORDER).
    Order = 0xA9,
    /// Feature extension acknowledgment (FEATUREEXTACK).
    FeatureExtAck = 0xAE,
    /// Session state (SESSIONSTATE).
    SessionState = 0xE4,
    /// Federated authentication info (FEDAUTHINFO).
    FedAuthInfo = 0xEE,
    /// Column info (COLINFO).
    ColInfo = 0xA5,
    /// Table name (TABNAME).
    TabName = 0xA4,
    /// Offset (OFFSET).
    Offset = 0x78,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAD => Some(Self::LoginAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xED => Some(Self::Sspi),
            0xFD => Some(Self::Done),
            0xFF => Some(Self::DoneInProc),
            0xFE => Some(Self::DoneProc),
            0x79 => Some(Self::ReturnStatus),
            0xAC => Some(Self::ReturnValue),
            0xA9 => Some(Self::Order),
            0xAE => Some(Self::FeatureExtAck),
            0xE4 => Some(Self::SessionState),
            0xEE => Some(Self::FedAuthInfo),
            0xA5 => Some(Self::ColInfo),
            0xA4 => Some(Self::TabName),
            0x78 => Some(Self::Offset),
            _ => None,
        }
    }

    /// Protocol name of the token.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ColMetaData => "COLMETADATA",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::LoginAck => "LOGINACK",
            Self::Row => "ROW",
            Self::NbcRow => "NBCROW",
            Self::EnvChange => "ENVCHANGE",
            Self::Sspi => "SSPI",
            Self::Done => "DONE",
            Self::DoneInProc => "DONEINPROC",
            Self::DoneProc => "DONEPROC",
            Self::ReturnStatus => "RETURNSTATUS",
            Self::ReturnValue => "RETURNVALUE",
            Self::Order => "ORDER",
            Self::FeatureExtAck => "FEATUREEXTACK",
            Self::SessionState => "SESSIONSTATE",
            Self::FedAuthInfo => "FEDAUTHINFO",
            Self::ColInfo => "COLINFO",
            Self::TabName => "TABNAME",
            Self::Offset => "OFFSET",
        }
    }
}

/// Decoded TDS token.
///
/// COLINFO, TABNAME, OFFSET, SSPI and FEDAUTHINFO are consumed by
/// [`TokenStream`] without producing a token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Column metadata describing the result set that follows.
    ColMetaData(Arc<ColMetaData>),
    /// One row from ROW or NBCROW, aligned with the active metadata.
    Row(Vec<SqlValue>),
    /// Completion of a SQL statement.
    Done(Done),
    /// Completion of a stored procedure.
    DoneProc(Done),
    /// Completion of a statement within a stored procedure.
    DoneInProc(Done),
    /// Return status from a stored procedure.
    ReturnStatus(i32),
    /// Output parameter or UDF return value.
    ReturnValue(ReturnValue),
    /// Error message from server.
    Error(ServerMessage),
    /// Informational message from server.
    Info(ServerMessage),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// Column ordering information.
    Order(Order),
    /// Feature extension acknowledgment.
    FeatureExtAck(FeatureExtAck),
    /// Session state information.
    SessionState(SessionState),
}

// =============================================================================
// Column metadata and rows
// =============================================================================

/// One column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name; empty for unnamed expressions.
    pub name: String,
    /// Type descriptor used to decode the column's values.
    pub type_info: TypeInfo,
    /// Column flags.
    pub flags: ColumnFlags,
    /// User-defined type id, 0 for built-in types.
    pub user_type: u32,
}

impl Column {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info,
            flags: ColumnFlags::NULLABLE,
            user_type: 0,
        }
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.is_nullable()
    }

    fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let user_type = cursor.read_u32_le()?;
        let flags = ColumnFlags::from_bits_retain(cursor.read_u16_le()?);
        let type_info = TypeInfo::decode(cursor)?;
        let name = cursor.read_b_varchar()?;
        Ok(Self {
            name,
            type_info,
            flags,
            user_type,
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_u32_le(self.user_type);
        dst.put_u16_le(self.flags.bits());
        self.type_info.encode(dst);
        if matches!(
            self.type_info.type_id,
            TypeId::Text | TypeId::NText | TypeId::Image
        ) {
            // Table name with zero parts.
            dst.put_u8(0);
        }
        write_b_varchar(dst, "column name", &self.name)
    }
}

/// Column metadata token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColMetaData {
    /// Column definitions.
    pub columns: Vec<Column>,
}

impl ColMetaData {
    /// Column count that means "no metadata".
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Create metadata from column definitions.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the result set has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Decode a COLMETADATA body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let count = cursor.read_u16_le()?;
        if count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let columns = (0..count)
            .map(|_| Column::decode(cursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }

    /// Encode as a COLMETADATA token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.put_u8(TokenType::ColMetaData as u8);
        if self.columns.is_empty() {
            dst.put_u16_le(Self::NO_METADATA);
            return Ok(());
        }
        let count = u16::try_from(self.columns.len()).map_err(|_| ProtocolError::MalformedToken {
            token: "COLMETADATA",
            reason: format!("{} columns", self.columns.len()),
        })?;
        dst.put_u16_le(count);
        for column in &self.columns {
            column.encode(dst)?;
        }
        Ok(())
    }

    /// Decode a ROW body: one value per column, in order.
    pub fn decode_row(&self, cursor: &mut WireCursor) -> Result<Vec<SqlValue>, ProtocolError> {
        self.columns
            .iter()
            .map(|column| decode_value(cursor, &column.type_info).map_err(ProtocolError::from))
            .collect()
    }

    /// Decode an NBCROW body.
    ///
    /// A set bit in the leading bitmap means the column is NULL and has no
    /// bytes on the wire; only columns with a clear bit are decoded.
    pub fn decode_nbc_row(&self, cursor: &mut WireCursor) -> Result<Vec<SqlValue>, ProtocolError> {
        let bitmap = cursor.take(self.columns.len().div_ceil(8))?;

        self.columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                    Ok(SqlValue::Null)
                } else {
                    decode_value(cursor, &column.type_info).map_err(ProtocolError::from)
                }
            })
            .collect()
    }

    /// Encode `values` as a ROW token.
    ///
    /// Nothing is written if any value does not fit its column.
    pub fn encode_row(&self, values: &[SqlValue], dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.check_arity(values)?;
        let mut row = BytesMut::new();
        row.put_u8(TokenType::Row as u8);
        for (column, value) in self.columns.iter().zip(values) {
            encode_value(&column.type_info, value, &mut row)?;
        }
        dst.extend_from_slice(&row);
        Ok(())
    }

    /// Encode `values` as an NBCROW token, omitting NULLs from the body.
    pub fn encode_nbc_row(
        &self,
        values: &[SqlValue],
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        self.check_arity(values)?;
        let mut bitmap = vec![0u8; values.len().div_ceil(8)];
        let mut body = BytesMut::new();
        for (i, (column, value)) in self.columns.iter().zip(values).enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            } else {
                encode_value(&column.type_info, value, &mut body)?;
            }
        }
        dst.put_u8(TokenType::NbcRow as u8);
        dst.put_slice(&bitmap);
        dst.extend_from_slice(&body);
        Ok(())
    }

    fn check_arity(&self, values: &[SqlValue]) -> Result<(), ProtocolError> {
        if values.len() != self.columns.len() {
            return Err(ProtocolError::MalformedToken {
                token: "ROW",
                reason: format!("{} values for {} columns", values.len(), self.columns.len()),
            });
        }
        Ok(())
    }
}

// =============================================================================
// DONE family
// =============================================================================

bitflags! {
    /// DONE, DONEPROC and DONEINPROC status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention signal.
        const ATTN = 0x0020;
        /// A server error terminated the statement.
        const SRVERROR = 0x0100;
    }
}

/// Completion marker carried by DONE, DONEPROC and DONEINPROC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count, valid when [`DoneStatus::COUNT`] is set.
    pub row_count: u64,
}

impl Done {
    /// Size of the token body in bytes.
    pub const SIZE: usize = 12;

    /// Final completion with no row count.
    #[must_use]
    pub const fn final_done() -> Self {
        Self {
            status: DoneStatus::empty(),
            cur_cmd: 0,
            row_count: 0,
        }
    }

    /// Completion carrying a row count.
    #[must_use]
    pub const fn with_count(row_count: u64, more: bool) -> Self {
        let status = if more {
            DoneStatus::COUNT.union(DoneStatus::MORE)
        } else {
            DoneStatus::COUNT
        };
        Self {
            status,
            cur_cmd: 0,
            row_count,
        }
    }

    /// Decode a DONE-family body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let status = DoneStatus::from_bits_retain(cursor.read_u16_le()?);
        let cur_cmd = cursor.read_u16_le()?;
        let row_count = cursor.read_u64_le()?;
        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode with the given token type byte.
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token_type as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Check if more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Check if an error occurred.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.intersects(DoneStatus::ERROR.union(DoneStatus::SRVERROR))
    }

    /// Check if this acknowledges an attention signal.
    #[must_use]
    pub const fn is_attention(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Row count when the server marked it valid.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.row_count)
        } else {
            None
        }
    }
}

// =============================================================================
// ERROR / INFO
// =============================================================================

/// Server message carried by ERROR and INFO tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerMessage {
    /// Create a message with the given number, class and text.
    pub fn new(number: i32, class: u8, message: impl Into<String>) -> Self {
        Self {
            number,
            state: 1,
            class,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Decode an ERROR or INFO body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let length = usize::from(cursor.read_u16_le()?);
        let mut body = WireCursor::new(cursor.take(length)?);

        Ok(Self {
            number: body.read_i32_le()?,
            state: body.read_u8()?,
            class: body.read_u8()?,
            message: body.read_us_varchar()?,
            server: body.read_b_varchar()?,
            procedure: body.read_b_varchar()?,
            line: body.read_i32_le()?,
        })
    }

    /// Encode as an ERROR or INFO token.
    pub fn encode(&self, token_type: TokenType, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        write_us_varchar(&mut body, "message", &self.message)?;
        write_b_varchar(&mut body, "server name", &self.server)?;
        write_b_varchar(&mut body, "procedure name", &self.procedure)?;
        body.put_i32_le(self.line);

        put_u16_body(token_type, &body, dst)
    }

    /// Check if this is a fatal error (severity >= 20).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }

    /// Check if this message is only informational (severity <= 10).
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        self.class <= 10
    }
}

/// Write a token whose body is prefixed by a u16 length.
fn put_u16_body(
    token_type: TokenType,
    body: &[u8],
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let length = u16::try_from(body.len()).map_err(|_| ProtocolError::MalformedToken {
        token: token_type.name(),
        reason: format!("body of {} bytes", body.len()),
    })?;
    dst.put_u8(token_type as u8);
    dst.put_u16_le(length);
    dst.put_slice(body);
    Ok(())
}

// =============================================================================
// LOGINACK
// =============================================================================

/// Login acknowledgment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type (1 = SQL).
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: ServerVersion,
}

impl LoginAck {
    /// Decode a LOGINACK body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let length = usize::from(cursor.read_u16_le()?);
        let mut body = WireCursor::new(cursor.take(length)?);

        let interface = body.read_u8()?;
        let tds_version = TdsVersion::new(body.read_u32_be()?);
        let prog_name = body.read_b_varchar()?;
        let prog_version = ServerVersion::from_raw(body.read_u32_be()?, 0);
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Encode as a LOGINACK token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_u8(self.interface);
        body.put_u32(self.tds_version.raw());
        write_b_varchar(&mut body, "program name", &self.prog_name)?;
        body.put_u32(self.prog_version.raw());
        put_u16_body(TokenType::LoginAck, &body, dst)
    }
}

// =============================================================================
// ENVCHANGE
// =============================================================================

/// Environment change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Database changed.
    Database = 1,
    /// Language changed.
    Language = 2,
    /// Character set changed.
    CharacterSet = 3,
    /// Packet size changed.
    PacketSize = 4,
    /// SQL collation.
    SqlCollation = 7,
    /// Begin transaction.
    BeginTransaction = 8,
    /// Commit transaction.
    CommitTransaction = 9,
    /// Rollback transaction.
    RollbackTransaction = 10,
    /// Routing information.
    Routing = 20,
}

/// Environment change reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database name.
        new: String,
        /// Previous database name.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Negotiated packet size changed.
    PacketSize {
        /// New packet size in bytes.
        new: u32,
        /// Previous packet size in bytes.
        old: u32,
    },
    /// Default collation changed.
    SqlCollation {
        /// New collation.
        new: Option<Collation>,
        /// Previous collation.
        old: Option<Collation>,
    },
    /// A transaction began; later requests must carry `descriptor`.
    BeginTransaction {
        /// Transaction descriptor.
        descriptor: u64,
    },
    /// The transaction identified by `descriptor` committed.
    CommitTransaction {
        /// Descriptor of the ended transaction.
        descriptor: u64,
    },
    /// The transaction identified by `descriptor` rolled back.
    RollbackTransaction {
        /// Descriptor of the ended transaction.
        descriptor: u64,
    },
    /// The server redirects the client.
    Routing {
        /// Host name.
        host: String,
        /// Port number.
        port: u16,
    },
    /// A change this client does not interpret.
    Other {
        /// Raw change type.
        env_type: u8,
        /// Raw value bytes.
        data: Bytes,
    },
}

impl EnvChange {
    /// Decode an ENVCHANGE body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let length = usize::from(cursor.read_u16_le()?);
        let mut body = WireCursor::new(cursor.take(length)?);

        let env_type = body.read_u8()?;
        let change = match env_type {
            1 => Self::Database {
                new: body.read_b_varchar()?,
                old: body.read_b_varchar()?,
            },
            2 => Self::Language {
                new: body.read_b_varchar()?,
                old: body.read_b_varchar()?,
            },
            4 => {
                let new = body.read_b_varchar()?;
                let old = body.read_b_varchar()?;
                Self::PacketSize {
                    new: new.parse().map_err(|_| ProtocolError::MalformedToken {
                        token: "ENVCHANGE",
                        reason: format!("packet size {new:?}"),
                    })?,
                    old: old.parse().unwrap_or_default(),
                }
            }
            7 => Self::SqlCollation {
                new: read_collation(&mut body)?,
                old: read_collation(&mut body)?,
            },
            8 => {
                let descriptor = read_descriptor(&mut body)?.ok_or_else(|| {
                    ProtocolError::MalformedToken {
                        token: "ENVCHANGE",
                        reason: "begin transaction without descriptor".into(),
                    }
                })?;
                Self::BeginTransaction { descriptor }
            }
            9 | 10 => {
                read_descriptor(&mut body)?;
                let descriptor = read_descriptor(&mut body)?.unwrap_or_default();
                if env_type == 9 {
                    Self::CommitTransaction { descriptor }
                } else {
                    Self::RollbackTransaction { descriptor }
                }
            }
            20 => {
                let _routing_len = body.read_u16_le()?;
                let _protocol = body.read_u8()?;
                let port = body.read_u16_le()?;
                let host = body.read_us_varchar()?;
                Self::Routing { host, port }
            }
            _ => Self::Other {
                env_type,
                data: body.take_rest(),
            },
        };
        Ok(change)
    }

    /// Raw change type.
    #[must_use]
    pub fn env_type(&self) -> u8 {
        match self {
            Self::Database { .. } => EnvChangeType::Database as u8,
            Self::Language { .. } => EnvChangeType::Language as u8,
            Self::PacketSize { .. } => EnvChangeType::PacketSize as u8,
            Self::SqlCollation { .. } => EnvChangeType::SqlCollation as u8,
            Self::BeginTransaction { .. } => EnvChangeType::BeginTransaction as u8,
            Self::CommitTransaction { .. } => EnvChangeType::CommitTransaction as u8,
            Self::RollbackTransaction { .. } => EnvChangeType::RollbackTransaction as u8,
            Self::Routing { .. } => EnvChangeType::Routing as u8,
            Self::Other { env_type, .. } => *env_type,
        }
    }

    /// Encode as an ENVCHANGE token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        body.put_u8(self.env_type());
        match self {
            Self::Database { new, old } | Self::Language { new, old } => {
                write_b_varchar(&mut body, "environment value", new)?;
                write_b_varchar(&mut body, "environment value", old)?;
            }
            Self::PacketSize { new, old } => {
                write_b_varchar(&mut body, "packet size", &new.to_string())?;
                write_b_varchar(&mut body, "packet size", &old.to_string())?;
            }
            Self::SqlCollation { new, old } => {
                write_collation(&mut body, *new);
                write_collation(&mut body, *old);
            }
            Self::BeginTransaction { descriptor } => {
                body.put_u8(8);
                body.put_u64_le(*descriptor);
                body.put_u8(0);
            }
            Self::CommitTransaction { descriptor } | Self::RollbackTransaction { descriptor } => {
                body.put_u8(0);
                body.put_u8(8);
                body.put_u64_le(*descriptor);
            }
            Self::Routing { host, port } => {
                let mut value = BytesMut::new();
                value.put_u8(0);
                value.put_u16_le(*port);
                write_us_varchar(&mut value, "routing host", host)?;
                body.put_u16_le(value.len() as u16);
                body.put_slice(&value);
                body.put_u16_le(0);
            }
            Self::Other { data, .. } => body.put_slice(data),
        }
        put_u16_body(TokenType::EnvChange, &body, dst)
    }
}

fn read_collation(cursor: &mut WireCursor) -> Result<Option<Collation>, ProtocolError> {
    let len = usize::from(cursor.read_u8()?);
    if len == 0 {
        return Ok(None);
    }
    let mut value = WireCursor::new(cursor.take(len)?);
    Ok(Some(Collation::decode(&mut value)?))
}

fn write_collation(dst: &mut BytesMut, collation: Option<Collation>) {
    match collation {
        Some(collation) => {
            dst.put_u8(5);
            collation.encode(dst);
        }
        None => dst.put_u8(0),
    }
}

/// Read a B_VARBYTE transaction descriptor, `None` when empty.
fn read_descriptor(cursor: &mut WireCursor) -> Result<Option<u64>, ProtocolError> {
    match cursor.read_u8()? {
        0 => Ok(None),
        8 => Ok(Some(cursor.read_u64_le()?)),
        len => Err(ProtocolError::MalformedToken {
            token: "ENVCHANGE",
            reason: format!("transaction descriptor of {len} bytes"),
        }),
    }
}

// =============================================================================
// RETURNVALUE and minor tokens
// =============================================================================

/// Output parameter or UDF return value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name, including the leading `@`.
    pub name: String,
    /// Status: 0x01 output parameter, 0x02 UDF return value.
    pub status: u8,
    /// User type.
    pub user_type: u32,
    /// Type flags.
    pub flags: ColumnFlags,
    /// Type of the value.
    pub type_info: TypeInfo,
    /// Decoded value.
    pub value: SqlValue,
}

impl ReturnValue {
    /// Decode a RETURNVALUE body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let ordinal = cursor.read_u16_le()?;
        let name = cursor.read_b_varchar()?;
        let status = cursor.read_u8()?;
        let user_type = cursor.read_u32_le()?;
        let flags = ColumnFlags::from_bits_retain(cursor.read_u16_le()?);
        let type_info = TypeInfo::decode(cursor)?;
        let value = decode_value(cursor, &type_info)?;
        Ok(Self {
            ordinal,
            name,
            status,
            user_type,
            flags,
            type_info,
            value,
        })
    }

    /// Encode as a RETURNVALUE token.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut token = BytesMut::new();
        token.put_u8(TokenType::ReturnValue as u8);
        token.put_u16_le(self.ordinal);
        write_b_varchar(&mut token, "parameter name", &self.name)?;
        token.put_u8(self.status);
        token.put_u32_le(self.user_type);
        token.put_u16_le(self.flags.bits());
        self.type_info.encode(&mut token);
        encode_value(&self.type_info, &self.value, &mut token)?;
        dst.extend_from_slice(&token);
        Ok(())
    }
}

/// Column ordering information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Ordered column ordinals.
    pub columns: Vec<u16>,
}

impl Order {
    /// Decode an ORDER body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let length = usize::from(cursor.read_u16_le()?);
        if length % 2 != 0 {
            return Err(ProtocolError::MalformedToken {
                token: "ORDER",
                reason: format!("odd length {length}"),
            });
        }
        let columns = (0..length / 2)
            .map(|_| cursor.read_u16_le())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }
}

/// Feature extension acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtAck {
    /// Acknowledged features.
    pub features: Vec<FeatureAck>,
}

/// Individual feature acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Feature ID.
    pub feature_id: u8,
    /// Feature data.
    pub data: Bytes,
}

impl FeatureExtAck {
    /// Feature terminator byte.
    pub const TERMINATOR: u8 = 0xFF;

    /// Decode a FEATUREEXTACK body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let mut features = Vec::new();
        loop {
            let feature_id = cursor.read_u8()?;
            if feature_id == Self::TERMINATOR {
                break;
            }
            let len = cursor.read_u32_le()? as usize;
            let data = cursor.take(len)?;
            features.push(FeatureAck { feature_id, data });
        }
        Ok(Self { features })
    }
}

/// Session state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Session state data.
    pub data: Bytes,
}

impl SessionState {
    /// Decode a SESSIONSTATE body.
    pub fn decode(cursor: &mut WireCursor) -> Result<Self, ProtocolError> {
        let len = cursor.read_u32_le()? as usize;
        let data = cursor.take(len)?;
        Ok(Self { data })
    }
}

/// Encode a RETURNSTATUS token.
pub fn encode_return_status(status: i32, dst: &mut impl BufMut) {
    dst.put_u8(TokenType::ReturnStatus as u8);
    dst.put_i32_le(status);
}

// =============================================================================
// Token stream
// =============================================================================

/// Forward-only decoder over one response message.
///
/// The stream owns the active column metadata: COLMETADATA replaces it and
/// any DONE-family token ends it, so a ROW outside a result set is an error.
/// Unknown token bytes are fatal because their length cannot be known.
/// After the first error the stream yields nothing further.
///
/// ```
/// use bytes::BytesMut;
/// use tds_protocol::token::{Done, Token, TokenStream, TokenType};
///
/// let mut buf = BytesMut::new();
/// Done::with_count(3, false).encode(TokenType::Done, &mut buf);
///
/// let tokens: Vec<_> = TokenStream::new(buf.freeze()).collect::<Result<_, _>>().unwrap();
/// assert!(matches!(tokens.as_slice(), [Token::Done(done)] if done.row_count == 3));
/// ```
#[derive(Debug)]
pub struct TokenStream {
    cursor: WireCursor,
    metadata: Option<Arc<ColMetaData>>,
    failed: bool,
}

impl TokenStream {
    /// Create a stream over a reassembled response message.
    #[must_use]
    pub fn new(message: Bytes) -> Self {
        Self {
            cursor: WireCursor::new(message),
            metadata: None,
            failed: false,
        }
    }

    /// Metadata of the result set being decoded, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<ColMetaData>> {
        self.metadata.as_ref()
    }

    /// Bytes not yet decoded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Decode the next token.
    ///
    /// Returns `None` at the end of the message.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        if self.failed {
            return Ok(None);
        }
        let result = self.decode_next();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn decode_next(&mut self) -> Result<Option<Token>, ProtocolError> {
        loop {
            if self.cursor.is_empty() {
                return Ok(None);
            }
            let byte = self.cursor.read_u8()?;
            let token_type = TokenType::from_u8(byte).ok_or(ProtocolError::UnknownToken(byte))?;

            let token = match token_type {
                TokenType::ColMetaData => {
                    let metadata = Arc::new(ColMetaData::decode(&mut self.cursor)?);
                    self.metadata = Some(Arc::clone(&metadata));
                    Token::ColMetaData(metadata)
                }
                TokenType::Row => {
                    let metadata = self
                        .metadata
                        .as_ref()
                        .ok_or(ProtocolError::RowWithoutMetadata)?;
                    Token::Row(metadata.decode_row(&mut self.cursor)?)
                }
                TokenType::NbcRow => {
                    let metadata = self
                        .metadata
                        .as_ref()
                        .ok_or(ProtocolError::RowWithoutMetadata)?;
                    Token::Row(metadata.decode_nbc_row(&mut self.cursor)?)
                }
                TokenType::Done => {
                    self.metadata = None;
                    Token::Done(Done::decode(&mut self.cursor)?)
                }
                TokenType::DoneProc => {
                    self.metadata = None;
                    Token::DoneProc(Done::decode(&mut self.cursor)?)
                }
                TokenType::DoneInProc => {
                    self.metadata = None;
                    Token::DoneInProc(Done::decode(&mut self.cursor)?)
                }
                TokenType::Error => Token::Error(ServerMessage::decode(&mut self.cursor)?),
                TokenType::Info => Token::Info(ServerMessage::decode(&mut self.cursor)?),
                TokenType::LoginAck => Token::LoginAck(LoginAck::decode(&mut self.cursor)?),
                TokenType::EnvChange => Token::EnvChange(EnvChange::decode(&mut self.cursor)?),
                TokenType::ReturnStatus => Token::ReturnStatus(self.cursor.read_i32_le()?),
                TokenType::ReturnValue => {
                    Token::ReturnValue(ReturnValue::decode(&mut self.cursor)?)
                }
                TokenType::Order => Token::Order(Order::decode(&mut self.cursor)?),
                TokenType::FeatureExtAck => {
                    Token::FeatureExtAck(FeatureExtAck::decode(&mut self.cursor)?)
                }
                TokenType::SessionState => {
                    Token::SessionState(SessionState::decode(&mut self.cursor)?)
                }
                TokenType::ColInfo | TokenType::TabName | TokenType::Sspi => {
                    let len = usize::from(self.cursor.read_u16_le()?);
                    self.cursor.skip(len)?;
                    continue;
                }
                TokenType::FedAuthInfo => {
                    let len = self.cursor.read_u32_le()? as usize;
                    self.cursor.skip(len)?;
                    continue;
                }
                TokenType::Offset => {
                    // Identifier and offset length.
                    self.cursor.skip(4)?;
                    continue;
                }
            };
            return Ok(Some(token));
        }
    }
}

impl Iterator for TokenStream {
    type Item = Result<Token, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

impl std::iter::FusedIterator for TokenStream {}
