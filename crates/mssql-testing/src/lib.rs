//! # mssql-testing
//!
//! Test infrastructure for the session engine.
//!
//! [`MockTdsServer`] listens on a localhost port and answers the TDS
//! handshake and requests with configured responses, so client tests run
//! over a real socket without a SQL Server instance.
//!
//! ```rust,no_run
//! use mssql_testing::{MockResponse, MockTdsServer};
//!
//! # async fn example() -> Result<(), mssql_testing::MockServerError> {
//! let server = MockTdsServer::builder()
//!     .with_response("SELECT 1", MockResponse::scalar_int(1))
//!     .with_response("UPDATE t SET x = 1", MockResponse::affected(3))
//!     .build()
//!     .await?;
//!
//! println!("listening on {}", server.addr());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{
    LoginBehavior, MockParam, MockRequest, MockResponse, MockServerBuilder, MockServerConfig,
    MockServerError, MockTdsServer, RequestKind,
};
