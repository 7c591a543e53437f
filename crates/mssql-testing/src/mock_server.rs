//! Mock TDS server for unit testing.
//!
//! The server speaks enough of the protocol to take a client through
//! pre-login and login and to answer SQL batches, RPC calls, transaction
//! manager requests and attention signals. Responses are encoded with the
//! same token encoders the client decodes with, so tests exercise real wire
//! bytes.
//!
//! Every request after login is recorded and can be inspected with
//! [`MockTdsServer::requests`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_testing::mock_server::{MockResponse, MockTdsServer};
//! use mssql_types::{SqlValue, TypeInfo};
//! use tds_protocol::Column;
//!
//! # async fn example() -> Result<(), mssql_testing::MockServerError> {
//! let server = MockTdsServer::builder()
//!     .with_response(
//!         "SELECT id FROM users",
//!         MockResponse::rows(
//!             vec![Column::new("id", TypeInfo::int(4))],
//!             vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
//!         ),
//!     )
//!     .build()
//!     .await?;
//!
//! let addr = server.addr();
//! // Connect a client to addr...
//! # Ok(())
//! # }
//! ```

use bytes::{Bytes, BytesMut};
use mssql_types::{SqlValue, TypeInfo, WireCursor, decode_value};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tds_protocol::token::encode_return_status;
use tds_protocol::{
    ColMetaData, Column, DEFAULT_PACKET_SIZE, Done, DoneStatus, EncryptionLevel, EnvChange,
    LoginAck, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, PreLogin, ReturnValue,
    ServerMessage, ServerVersion, TdsVersion, TokenType,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server already stopped.
    #[error("Server already stopped")]
    Stopped,
}

impl MockServerError {
    fn protocol(err: impl fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Procedure id the client uses for parameterized statements.
const SP_EXECUTESQL_ID: u16 = 0x000A;

/// First transaction descriptor handed out by a server.
const FIRST_DESCRIPTOR: u64 = 0x0000_0001_0000_0001;

/// How the server answers LOGIN7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginBehavior {
    /// LOGINACK, database and packet size changes, DONE.
    Accept,
    /// An ERROR token followed by DONE with the error flag.
    Reject {
        /// Error number, 18456 for a failed SQL login.
        number: i32,
        /// Error text.
        message: String,
    },
    /// A bare DONE with no LOGINACK.
    NoAck,
}

impl LoginBehavior {
    /// The rejection SQL Server sends for a bad user name or password.
    pub fn login_failed(user: &str) -> Self {
        Self::Reject {
            number: 18456,
            message: format!("Login failed for user '{user}'."),
        }
    }
}

/// A server-side handler for [`MockResponse::Custom`].
pub type ResponseFn = Arc<dyn Fn(&MockRequest) -> MockResponse + Send + Sync>;

/// Mock response for a request.
#[derive(Clone)]
pub enum MockResponse {
    /// COLMETADATA, one ROW per entry, DONE with the row count.
    Rows {
        /// Column definitions.
        columns: Vec<Column>,
        /// Row values, one inner vector per row.
        rows: Vec<Vec<SqlValue>>,
    },
    /// DONE with a row count and no result set.
    RowsAffected(u64),
    /// ERROR followed by DONE with the error flag.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity (class).
        severity: u8,
    },
    /// Stored procedure completion.
    Procedure {
        /// Value of the RETURNSTATUS token.
        return_status: i32,
        /// Output parameters as name, type and value.
        outputs: Vec<(String, TypeInfo, SqlValue)>,
        /// Row count reported by a DONEINPROC before the return status.
        rows_affected: Option<u64>,
    },
    /// Several responses in one message, joined with DONE_MORE.
    Batch(Vec<MockResponse>),
    /// Token bytes sent exactly as given.
    Raw(Bytes),
    /// Bytes written to the socket as they are, packet headers included.
    /// For responses with broken framing.
    Wire(Bytes),
    /// No response at all; the client has to cancel.
    Hang,
    /// Computed from the request.
    Custom(ResponseFn),
}

impl MockResponse {
    /// A final DONE and nothing else.
    pub fn empty() -> Self {
        Self::Batch(Vec::new())
    }

    /// A result set.
    pub fn rows(columns: Vec<Column>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// A single unnamed INT column with one row.
    pub fn scalar_int(value: i32) -> Self {
        Self::rows(
            vec![Column::new("", TypeInfo::int(4))],
            vec![vec![SqlValue::Int(value)]],
        )
    }

    /// A row count.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A server error with severity 16.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// A procedure completion with a return status and output parameters.
    pub fn procedure(return_status: i32, outputs: Vec<(String, TypeInfo, SqlValue)>) -> Self {
        Self::Procedure {
            return_status,
            outputs,
            rows_affected: None,
        }
    }

    /// Compute the response from the request.
    pub fn custom(f: impl Fn(&MockRequest) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Append the tokens of this response to `dst`. `more` is set on the
    /// last DONE when more responses follow in the same message.
    pub fn encode(&self, request: &MockRequest, more: bool, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::Rows { columns, rows } => {
                let metadata = ColMetaData::new(columns.clone());
                metadata.encode(dst).map_err(MockServerError::protocol)?;
                for row in rows {
                    metadata
                        .encode_row(row, dst)
                        .map_err(MockServerError::protocol)?;
                }
                Done::with_count(rows.len() as u64, more).encode(TokenType::Done, dst);
            }
            Self::RowsAffected(count) => {
                Done::with_count(*count, more).encode(TokenType::Done, dst);
            }
            Self::Error {
                number,
                message,
                severity,
            } => {
                ServerMessage::new(*number, *severity, message.as_str())
                    .encode(TokenType::Error, dst)
                    .map_err(MockServerError::protocol)?;
                done(DoneStatus::ERROR, more).encode(TokenType::Done, dst);
            }
            Self::Procedure {
                return_status,
                outputs,
                rows_affected,
            } => {
                if let Some(count) = rows_affected {
                    Done::with_count(*count, true).encode(TokenType::DoneInProc, dst);
                }
                encode_return_status(*return_status, dst);
                for (i, (name, type_info, value)) in outputs.iter().enumerate() {
                    ReturnValue {
                        ordinal: i as u16 + 1,
                        name: name.clone(),
                        status: 0x01,
                        user_type: 0,
                        flags: Default::default(),
                        type_info: type_info.clone(),
                        value: value.clone(),
                    }
                    .encode(dst)
                    .map_err(MockServerError::protocol)?;
                }
                done(DoneStatus::empty(), more).encode(TokenType::DoneProc, dst);
            }
            Self::Batch(parts) => match parts.split_last() {
                Some((last, init)) => {
                    for part in init {
                        part.encode(request, true, dst)?;
                    }
                    last.encode(request, more, dst)?;
                }
                None => done(DoneStatus::empty(), more).encode(TokenType::Done, dst),
            },
            Self::Raw(bytes) => dst.extend_from_slice(bytes),
            Self::Wire(_) | Self::Hang => {}
            Self::Custom(f) => f(request).encode(request, more, dst)?,
        }
        Ok(())
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .finish(),
            Self::RowsAffected(count) => f.debug_tuple("RowsAffected").field(count).finish(),
            Self::Error {
                number, severity, ..
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("severity", severity)
                .finish(),
            Self::Procedure { return_status, .. } => f
                .debug_struct("Procedure")
                .field("return_status", return_status)
                .finish(),
            Self::Batch(parts) => f.debug_tuple("Batch").field(parts).finish(),
            Self::Raw(bytes) => write!(f, "Raw({} bytes)", bytes.len()),
            Self::Wire(bytes) => write!(f, "Wire({} bytes)", bytes.len()),
            Self::Hang => write!(f, "Hang"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

fn done(status: DoneStatus, more: bool) -> Done {
    let mut status = status;
    status.set(DoneStatus::MORE, more);
    Done {
        status,
        ..Done::default()
    }
}

/// A decoded RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MockParam {
    /// Parameter name; empty for positional parameters.
    pub name: String,
    /// Whether the parameter was passed by reference.
    pub output: bool,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Value sent by the client.
    pub value: SqlValue,
}

/// What a recorded request asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// SQL batch text.
    SqlBatch(String),
    /// Remote procedure call.
    Rpc {
        /// Procedure name; `sp_executesql` for calls by that id.
        procedure: String,
        /// Parameters in call order.
        params: Vec<MockParam>,
    },
    /// Transaction manager request by type code.
    Transaction(u16),
    /// Attention signal.
    Attention,
}

/// A request received after login.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    /// Packet type of the message.
    pub packet_type: PacketType,
    /// Transaction descriptor from the request headers; 0 outside a
    /// transaction and for attention.
    pub transaction_descriptor: u64,
    /// Decoded body.
    pub kind: RequestKind,
}

impl MockRequest {
    /// Decode a request message.
    pub fn decode(packet_type: PacketType, payload: Bytes) -> Result<Self> {
        if packet_type == PacketType::Attention {
            return Ok(Self {
                packet_type,
                transaction_descriptor: 0,
                kind: RequestKind::Attention,
            });
        }

        let mut cursor = WireCursor::new(payload);
        let transaction_descriptor = read_all_headers(&mut cursor)?;
        let kind = match packet_type {
            PacketType::SqlBatch => {
                let chars = cursor.remaining() / 2;
                RequestKind::SqlBatch(
                    cursor
                        .read_utf16(chars)
                        .map_err(MockServerError::protocol)?,
                )
            }
            PacketType::Rpc => decode_rpc(&mut cursor).map_err(MockServerError::protocol)?,
            PacketType::TransactionManager => RequestKind::Transaction(
                cursor.read_u16_le().map_err(MockServerError::protocol)?,
            ),
            other => {
                return Err(MockServerError::Protocol(format!(
                    "unexpected request type {other:?}"
                )));
            }
        };

        Ok(Self {
            packet_type,
            transaction_descriptor,
            kind,
        })
    }

    /// SQL text of a batch or of an `sp_executesql` call.
    pub fn sql(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::SqlBatch(sql) => Some(sql),
            RequestKind::Rpc { procedure, params } if procedure == "sp_executesql" => {
                match params.first().map(|p| &p.value) {
                    Some(SqlValue::String(sql)) => Some(sql),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Procedure name of an RPC.
    pub fn procedure(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Rpc { procedure, .. } => Some(procedure),
            _ => None,
        }
    }

    /// Key used to look up the configured response: the SQL text when
    /// there is one, otherwise the procedure name.
    fn lookup_key(&self) -> Option<&str> {
        self.sql().or_else(|| self.procedure())
    }
}

/// Read ALL_HEADERS and return the transaction descriptor it carries.
fn read_all_headers(cursor: &mut WireCursor) -> Result<u64> {
    let total = cursor.read_u32_le().map_err(MockServerError::protocol)? as usize;
    let rest = cursor
        .take(total.saturating_sub(4))
        .map_err(MockServerError::protocol)?;
    let mut headers = WireCursor::new(rest);
    let mut descriptor = 0;
    while !headers.is_empty() {
        let length = headers.read_u32_le().map_err(MockServerError::protocol)? as usize;
        let body = headers
            .take(length.saturating_sub(4))
            .map_err(MockServerError::protocol)?;
        let mut body = WireCursor::new(body);
        if body.read_u16_le().map_err(MockServerError::protocol)? == 2 {
            descriptor = body.read_u64_le().map_err(MockServerError::protocol)?;
        }
    }
    Ok(descriptor)
}

fn decode_rpc(cursor: &mut WireCursor) -> std::result::Result<RequestKind, mssql_types::TypeError> {
    let name_len = cursor.read_u16_le()?;
    let procedure = if name_len == 0xFFFF {
        match cursor.read_u16_le()? {
            SP_EXECUTESQL_ID => "sp_executesql".to_string(),
            id => format!("proc#{id}"),
        }
    } else {
        cursor.read_utf16(usize::from(name_len))?
    };
    let _options = cursor.read_u16_le()?;

    let mut params = Vec::new();
    while !cursor.is_empty() {
        let name = cursor.read_b_varchar()?;
        let status = cursor.read_u8()?;
        let type_info = TypeInfo::decode(cursor)?;
        let value = decode_value(cursor, &type_info)?;
        params.push(MockParam {
            name,
            output: status & 0x01 != 0,
            type_info,
            value,
        });
    }

    Ok(RequestKind::Rpc { procedure, params })
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Responses keyed by SQL text or procedure name.
    pub responses: HashMap<String, MockResponse>,
    /// Response for requests with no configured response.
    pub default_response: Option<MockResponse>,
    /// Program name reported in LOGINACK.
    pub server_name: String,
    /// TDS version reported in LOGINACK.
    pub tds_version: TdsVersion,
    /// Database announced after login.
    pub database: String,
    /// Encryption level answered in pre-login.
    pub encryption: EncryptionLevel,
    /// Login handling.
    pub login: LoginBehavior,
    /// Packet size announced after login; none leaves the client's size.
    pub packet_size: Option<u32>,
}

/// Builder for creating a mock TDS server.
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                default_response: Some(MockResponse::empty()),
                server_name: "MockSQLServer".to_string(),
                tds_version: TdsVersion::V7_4,
                database: "master".to_string(),
                encryption: EncryptionLevel::NotSupported,
                login: LoginBehavior::Accept,
                packet_size: None,
            },
        }
    }

    /// Add a response for a SQL text or procedure name.
    pub fn with_response(mut self, key: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(key.into(), response);
        self
    }

    /// Set the default response for unmatched requests.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Set the server name reported in LoginAck.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the default database.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Set the encryption level answered in pre-login.
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    /// Set how login is answered.
    pub fn with_login(mut self, login: LoginBehavior) -> Self {
        self.config.login = login;
        self
    }

    /// Announce a packet size change after login.
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the server handle and its connections.
struct Shared {
    config: MockServerConfig,
    requests: Mutex<Vec<MockRequest>>,
    next_descriptor: AtomicU64,
    connection_count: Mutex<usize>,
}

/// A mock TDS server for testing.
///
/// The server listens on an ephemeral localhost port and serves every
/// accepted connection on its own task until the handle is dropped.
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            requests: Mutex::new(Vec::new()),
            next_descriptor: AtomicU64::new(FIRST_DESCRIPTOR),
            connection_count: Mutex::new(0),
        });

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            shared: Arc::clone(&shared),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&shared);
                                tokio::spawn(async move {
                                    *shared.connection_count.lock().await += 1;
                                    if let Err(e) = handle_connection(stream, &shared).await {
                                        tracing::debug!(%peer, error = %e, "mock connection ended");
                                    }
                                    let mut count = shared.connection_count.lock().await;
                                    *count = count.saturating_sub(1);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "mock accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Get the current connection count.
    pub async fn connection_count(&self) -> usize {
        *self.shared.connection_count.lock().await
    }

    /// Requests received so far, across all connections, in arrival order.
    pub async fn requests(&self) -> Vec<MockRequest> {
        self.shared.requests.lock().await.clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serve one client connection until it disconnects.
async fn handle_connection<S>(mut stream: S, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = &shared.config;

    let (packet_type, _) = read_message(&mut stream).await?;
    if packet_type != PacketType::PreLogin {
        return Err(MockServerError::Protocol(format!(
            "expected PreLogin, got {packet_type:?}"
        )));
    }
    let prelogin = PreLogin {
        version: ServerVersion::from_raw(0x1000_0000, 0),
        ..PreLogin::new().with_encryption(config.encryption)
    };
    write_message(
        &mut stream,
        PacketType::TabularResult,
        &prelogin.encode(),
        DEFAULT_PACKET_SIZE,
    )
    .await?;
    if config.encryption.is_required() {
        return Ok(());
    }

    let (packet_type, _) = read_message(&mut stream).await?;
    if packet_type != PacketType::Tds7Login {
        return Err(MockServerError::Protocol(format!(
            "expected Tds7Login, got {packet_type:?}"
        )));
    }
    let response = login_response(config)?;
    write_message(
        &mut stream,
        PacketType::TabularResult,
        &response,
        DEFAULT_PACKET_SIZE,
    )
    .await?;
    if config.login != LoginBehavior::Accept {
        return Ok(());
    }

    let packet_size = config
        .packet_size
        .map_or(DEFAULT_PACKET_SIZE, |size| size as usize);
    let mut descriptor = 0u64;

    loop {
        let (packet_type, payload) = match read_message(&mut stream).await {
            Ok(message) => message,
            Err(MockServerError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e),
        };

        let request = MockRequest::decode(packet_type, payload)?;
        tracing::debug!(kind = ?request.kind, "mock request");
        shared.requests.lock().await.push(request.clone());

        let mut response = BytesMut::new();
        match &request.kind {
            RequestKind::Attention => {
                done(DoneStatus::ATTN, false).encode(TokenType::Done, &mut response);
            }
            RequestKind::Transaction(request_type) => {
                let change = match request_type {
                    5 => {
                        descriptor = shared.next_descriptor.fetch_add(1, Ordering::Relaxed);
                        EnvChange::BeginTransaction { descriptor }
                    }
                    7 => EnvChange::CommitTransaction {
                        descriptor: std::mem::take(&mut descriptor),
                    },
                    8 => EnvChange::RollbackTransaction {
                        descriptor: std::mem::take(&mut descriptor),
                    },
                    other => {
                        return Err(MockServerError::Protocol(format!(
                            "unknown transaction request {other}"
                        )));
                    }
                };
                change
                    .encode(&mut response)
                    .map_err(MockServerError::protocol)?;
                Done::final_done().encode(TokenType::Done, &mut response);
            }
            RequestKind::SqlBatch(_) | RequestKind::Rpc { .. } => {
                let reply = find_response(&request, config);
                match &reply {
                    MockResponse::Hang => continue,
                    MockResponse::Wire(bytes) => {
                        stream.write_all(bytes).await?;
                        stream.flush().await?;
                        continue;
                    }
                    _ => {}
                }
                reply.encode(&request, false, &mut response)?;
            }
        }

        write_message(
            &mut stream,
            PacketType::TabularResult,
            &response,
            packet_size,
        )
        .await?;
    }

    Ok(())
}

fn find_response(request: &MockRequest, config: &MockServerConfig) -> MockResponse {
    request
        .lookup_key()
        .and_then(|key| config.responses.get(key))
        .or(config.default_response.as_ref())
        .cloned()
        .unwrap_or_else(MockResponse::empty)
}

fn login_response(config: &MockServerConfig) -> Result<BytesMut> {
    let mut dst = BytesMut::new();
    match &config.login {
        LoginBehavior::Accept => {
            LoginAck {
                interface: 1,
                tds_version: config.tds_version,
                prog_name: config.server_name.clone(),
                prog_version: ServerVersion::from_raw(0x1000_0FA0, 0),
            }
            .encode(&mut dst)
            .map_err(MockServerError::protocol)?;
            EnvChange::Database {
                new: config.database.clone(),
                old: "master".to_string(),
            }
            .encode(&mut dst)
            .map_err(MockServerError::protocol)?;
            if let Some(size) = config.packet_size {
                EnvChange::PacketSize {
                    new: size,
                    old: DEFAULT_PACKET_SIZE as u32,
                }
                .encode(&mut dst)
                .map_err(MockServerError::protocol)?;
            }
            Done::final_done().encode(TokenType::Done, &mut dst);
        }
        LoginBehavior::Reject { number, message } => {
            ServerMessage::new(*number, 14, message.as_str())
                .encode(TokenType::Error, &mut dst)
                .map_err(MockServerError::protocol)?;
            done(DoneStatus::ERROR, false).encode(TokenType::Done, &mut dst);
        }
        LoginBehavior::NoAck => Done::final_done().encode(TokenType::Done, &mut dst),
    }
    Ok(dst)
}

/// Read one message, joining packets until end-of-message.
async fn read_message<S>(stream: &mut S) -> Result<(PacketType, Bytes)>
where
    S: AsyncRead + Unpin,
{
    let mut payload = BytesMut::new();
    loop {
        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        stream.read_exact(&mut header_buf).await?;
        let mut cursor = WireCursor::new(Bytes::copy_from_slice(&header_buf));
        let header = PacketHeader::decode(&mut cursor).map_err(MockServerError::protocol)?;

        let start = payload.len();
        payload.resize(start + usize::from(header.length) - PACKET_HEADER_SIZE, 0);
        stream.read_exact(&mut payload[start..]).await?;

        if header.is_end_of_message() {
            return Ok((header.packet_type, payload.freeze()));
        }
    }
}

/// Write a message, split into packets of at most `packet_size` bytes.
async fn write_message<S>(
    stream: &mut S,
    packet_type: PacketType,
    payload: &[u8],
    packet_size: usize,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let chunk_size = packet_size - PACKET_HEADER_SIZE;
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(chunk_size).collect()
    };

    let mut buf = BytesMut::with_capacity(payload.len() + chunks.len() * PACKET_HEADER_SIZE);
    let mut packet_id = 1u8;
    for (i, chunk) in chunks.iter().enumerate() {
        let status = if i + 1 == chunks.len() {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        PacketHeader::new(
            packet_type,
            status,
            (PACKET_HEADER_SIZE + chunk.len()) as u16,
        )
        .with_packet_id(packet_id)
        .encode(&mut buf);
        buf.extend_from_slice(chunk);
        packet_id = packet_id.wrapping_add(1);
    }

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::{RpcParam, RpcRequest, Token, TokenStream, encode_sql_batch_with_transaction};

    fn batch_request(sql: &str) -> MockRequest {
        MockRequest::decode(
            PacketType::SqlBatch,
            encode_sql_batch_with_transaction(sql, 0),
        )
        .unwrap()
    }

    fn tokens(bytes: BytesMut) -> Vec<Token> {
        let mut stream = TokenStream::new(bytes.freeze());
        let mut tokens = Vec::new();
        while let Some(token) = stream.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockTdsServer::builder()
            .with_server_name("TestServer")
            .build()
            .await
            .unwrap();

        assert!(server.port() > 0);
        assert_eq!(server.host(), "127.0.0.1");
        assert_eq!(server.connection_count().await, 0);
        assert!(server.requests().await.is_empty());
    }

    #[test]
    fn test_decode_sql_batch() {
        let payload = encode_sql_batch_with_transaction("SELECT 1", 0x42);
        let request = MockRequest::decode(PacketType::SqlBatch, payload).unwrap();
        assert_eq!(request.transaction_descriptor, 0x42);
        assert_eq!(request.sql(), Some("SELECT 1"));
        assert_eq!(request.lookup_key(), Some("SELECT 1"));
    }

    #[test]
    fn test_decode_execute_sql() {
        let payload = RpcRequest::execute_sql(
            "SELECT @p1",
            vec![RpcParam::from_value("", 7i32)],
        )
        .encode(0)
        .unwrap();
        let request = MockRequest::decode(PacketType::Rpc, payload).unwrap();

        assert_eq!(request.procedure(), Some("sp_executesql"));
        assert_eq!(request.sql(), Some("SELECT @p1"));
        let RequestKind::Rpc { params, .. } = &request.kind else {
            panic!("expected rpc");
        };
        assert_eq!(params.len(), 3);
        assert_eq!(params[2].name, "@p1");
        assert_eq!(params[2].value, SqlValue::Int(7));
    }

    #[test]
    fn test_decode_named_procedure_with_output() {
        let payload = RpcRequest::named("dbo.count_orders")
            .param(RpcParam::new("@total", TypeInfo::int(4), SqlValue::Null).as_output())
            .encode(9)
            .unwrap();
        let request = MockRequest::decode(PacketType::Rpc, payload).unwrap();

        assert_eq!(request.transaction_descriptor, 9);
        assert_eq!(request.lookup_key(), Some("dbo.count_orders"));
        let RequestKind::Rpc { params, .. } = &request.kind else {
            panic!("expected rpc");
        };
        assert!(params[0].output);
        assert!(params[0].value.is_null());
    }

    #[test]
    fn test_rows_response_tokens() {
        let response = MockResponse::rows(
            vec![
                Column::new("id", TypeInfo::int(4)),
                Column::new("name", TypeInfo::nvarchar(20)),
            ],
            vec![
                vec![SqlValue::Int(1), SqlValue::String("a".into())],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        );
        let mut buf = BytesMut::new();
        response
            .encode(&batch_request("SELECT"), false, &mut buf)
            .unwrap();

        let tokens = tokens(buf);
        assert_eq!(tokens.len(), 4);
        assert!(matches!(&tokens[0], Token::ColMetaData(m) if m.len() == 2));
        assert!(matches!(&tokens[2], Token::Row(v) if v[1].is_null()));
        match &tokens[3] {
            Token::Done(done) => {
                assert_eq!(done.rows_affected(), Some(2));
                assert!(!done.has_more());
            }
            other => panic!("expected DONE, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_sets_more_between_parts() {
        let response = MockResponse::Batch(vec![
            MockResponse::affected(3),
            MockResponse::error(547, "constraint"),
        ]);
        let mut buf = BytesMut::new();
        response
            .encode(&batch_request("x"), false, &mut buf)
            .unwrap();

        let tokens = tokens(buf);
        assert!(matches!(&tokens[0], Token::Done(d) if d.has_more()));
        assert!(matches!(&tokens[1], Token::Error(m) if m.number == 547));
        assert!(matches!(&tokens[2], Token::Done(d) if d.has_error() && !d.has_more()));
    }

    #[test]
    fn test_custom_response_sees_request() {
        let response = MockResponse::custom(|request| {
            MockResponse::affected(request.sql().map_or(0, str::len) as u64)
        });
        let mut buf = BytesMut::new();
        response
            .encode(&batch_request("abcd"), false, &mut buf)
            .unwrap();

        assert!(matches!(&tokens(buf)[0], Token::Done(d) if d.rows_affected() == Some(4)));
    }

    #[test]
    fn test_reject_login_response() {
        let mut config = MockServerBuilder::new().config;
        config.login = LoginBehavior::login_failed("sa");
        let tokens = tokens(login_response(&config).unwrap());

        assert!(matches!(&tokens[0], Token::Error(m) if m.number == 18456));
        assert!(matches!(&tokens[1], Token::Done(d) if d.has_error()));
    }

    #[tokio::test]
    async fn test_write_message_splits_packets() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = vec![7u8; 1200];
        write_message(&mut server, PacketType::TabularResult, &payload, 512)
            .await
            .unwrap();

        let (packet_type, read) = read_message(&mut client).await.unwrap();
        assert_eq!(packet_type, PacketType::TabularResult);
        assert_eq!(read.len(), 1200);
    }
}
