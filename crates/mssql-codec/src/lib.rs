//! # mssql-codec
//!
//! Async framing layer for TDS packet handling.
//!
//! This crate transforms raw byte streams into high-level TDS packets,
//! handling packet reassembly across TCP segment boundaries and packet
//! continuation for large messages.
//!
//! ## Features
//!
//! - Packet reassembly across TCP segments
//! - Message splitting by the negotiated packet size and reassembly with
//!   packet number and packet type checks
//! - Attention signalling on a split transport, only for an outstanding
//!   request
//! - Integration with tokio-util's codec framework
//!
//! ## Architecture
//!
//! ```text
//! Transport → TdsCodec (packets) → MessageStream / MessageWriter → Connection
//! ```
//!
//! ```rust,ignore
//! use mssql_codec::Connection;
//!
//! let mut conn = Connection::with_packet_size(tcp_stream, 4096);
//! conn.send_message(PacketType::SqlBatch, payload).await?;
//! let response = conn.read_message().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod message;
pub mod packet_codec;
pub mod transport;

pub use connection::{CancelHandle, Connection};
pub use error::CodecError;
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
pub use transport::{MessageStream, MessageWriter};
