//! # mssql-client
//!
//! Async SQL Server session built on the TDS protocol crates.
//!
//! A [`Session`] drives one connection through its lifecycle:
//!
//! ```text
//! Disconnected -> PreLogin -> Authenticating -> Ready <-> Executing
//!                                                 |
//!                          any -> Closed, any -> Errored
//! ```
//!
//! Requests are SQL batches ([`Session::execute`]), parameterized statements
//! run through `sp_executesql` ([`Session::query`]) and stored procedure
//! calls ([`Session::callproc`]). Each returns a [`QueryResult`] holding
//! every result set, the summed row count, the return status and any
//! output parameters.
//!
//! ## Transactions
//!
//! With `autocommit` off (the default) the first request begins a
//! transaction through a transaction manager request, and the caller ends
//! it with [`Session::commit`] or [`Session::rollback`]. The descriptor the
//! server assigns is carried in the headers of every later request.
//!
//! ## Errors
//!
//! A server ERROR token fails the request but leaves the session ready.
//! Framing errors, protocol violations, I/O failures and timeouts leave it
//! [`Errored`](SessionState::Errored); see [`Error::is_fatal`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_client::{Config, RpcArg, Session};
//! use mssql_types::{SqlValue, TypeInfo};
//!
//! # async fn example() -> mssql_client::Result<()> {
//! let config = Config::new()
//!     .host("localhost")
//!     .user("sa")
//!     .password("Secret123")
//!     .database("orders");
//! let mut session = Session::connect(config).await?;
//!
//! let result = session
//!     .query("SELECT id, name FROM users WHERE id = @p1", &[SqlValue::Int(1)])
//!     .await?;
//! for row in result.rows() {
//!     let name: String = row.get_by_name("name")?;
//!     println!("{name}");
//! }
//!
//! let result = session
//!     .callproc(
//!         "dbo.count_orders",
//!         vec![
//!             RpcArg::named("@customer", 7i32),
//!             RpcArg::named("@total", SqlValue::Null)
//!                 .with_type(TypeInfo::int(4))
//!                 .output(),
//!         ],
//!     )
//!     .await?;
//! println!("{:?}", result.get_output("total"));
//!
//! session.commit().await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod query;
pub mod result;
pub mod row;
pub mod session;
pub mod state;
pub mod transaction;

pub use config::{Config, TimeoutConfig};
pub use error::{Error, ErrorKind, Result};
pub use mssql_codec::CancelHandle;
pub use mssql_types::{FromSql, SqlValue};
pub use query::RpcArg;
pub use result::{OutputParam, QueryResult, ResultSet};
pub use row::Row;
pub use session::Session;
pub use state::SessionState;
pub use tds_protocol::{Column, ServerMessage};
pub use transaction::IsolationLevel;
