//! # tds-protocol
//!
//! Implementation of the MS-TDS (Tabular Data Stream) protocol used by
//! Microsoft SQL Server.
//!
//! This crate holds the packet header, the request encoders (pre-login,
//! Login7, SQL batch, RPC and transaction manager requests) and the token
//! stream decoder. Value encoding is delegated to `mssql-types`.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide async I/O capabilities.
//!
//! ## Example
//!
//! ```
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! let mut wire = Vec::new();
//! header.encode(&mut wire);
//! assert_eq!(wire, [0x01, 0x01, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod transaction;
pub mod types;
pub mod version;

pub use error::ProtocolError;
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, scramble_password};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use rpc::{ParamFlags, ProcId, ProcName, RpcOptionFlags, RpcParam, RpcRequest};
pub use sql_batch::{encode_sql_batch, encode_sql_batch_with_transaction};
pub use token::{
    ColMetaData, Column, Done, DoneStatus, EnvChange, EnvChangeType, FeatureAck, FeatureExtAck,
    LoginAck, Order, ReturnValue, ServerMessage, SessionState, Token, TokenStream, TokenType,
};
pub use transaction::{IsolationLevel, TransactionRequest};
pub use types::{ColumnFlags, TypeId, Updateable};
pub use version::{ServerVersion, TdsVersion};
