//! # mssql-types
//!
//! SQL Server type codec for the TDS protocol.
//!
//! This crate converts between the TDS wire representation of SQL Server
//! values and [`SqlValue`]. Column and parameter types are described by
//! [`TypeInfo`]; a value is decoded from a [`WireCursor`] with
//! [`decode_value`] and encoded with [`encode_value`].
//!
//! Every decode consumes exactly the bytes of one value. Encoding never
//! truncates: a value that does not fit its descriptor is an error.
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC`/`MONEY` | `rust_decimal::Decimal` |
//! | `DECIMAL`/`NUMERIC` beyond 28 digits | [`Numeric`] |
//! | `CHAR`/`VARCHAR`/`NCHAR`/`NVARCHAR` | `String` |
//! | `BINARY`/`VARBINARY` | `bytes::Bytes` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME`/`DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collation;
pub mod cursor;
pub mod decode;
pub mod encode;
pub mod error;
pub mod from_sql;
pub mod numeric;
pub mod type_id;
pub mod type_info;
pub mod value;

pub use collation::Collation;
pub use cursor::WireCursor;
pub use decode::{TdsDecode, decode_payload, decode_utf16_string, decode_value, read_value_bytes};
pub use encode::{TdsEncode, encode_payload, encode_utf16_string, encode_value};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use numeric::Numeric;
pub use type_id::{LengthKind, TypeId};
pub use type_info::TypeInfo;
pub use value::SqlValue;
