//! The session state machine.
//!
//! A [`Session`] owns one transport and drives it through pre-login, login
//! and request/response exchanges. One request is outstanding at a time;
//! every operation takes `&mut self`, so concurrent callers must serialize
//! access themselves.

use bytes::Bytes;
use mssql_codec::{CancelHandle, Connection, Message};
use mssql_types::{Collation, SqlValue};
use tds_protocol::{
    EnvChange, IsolationLevel, Login7, LoginAck, PacketType, PreLogin, ProtocolError, RpcParam,
    RpcRequest, ServerMessage, ServerVersion, TdsVersion, Token, TokenStream, TransactionRequest,
    encode_sql_batch_with_transaction,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::RpcArg;
use crate::result::{QueryResult, ResultBuilder};
use crate::state::SessionState;
use crate::transaction::TransactionState;

/// A TDS session over one transport.
///
/// ```no_run
/// use mssql_client::{Config, Session};
///
/// # async fn example() -> mssql_client::Result<()> {
/// let config = Config::new().host("localhost").user("sa").password("Secret123");
/// let mut session = Session::connect(config).await?;
///
/// let result = session.execute("SELECT name FROM sys.databases").await?;
/// for row in result.rows() {
///     let name: String = row.get(0)?;
///     println!("{name}");
/// }
///
/// session.commit().await?;
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Session<T = TcpStream>
where
    T: AsyncRead + AsyncWrite,
{
    connection: Option<Connection<T>>,
    config: Config,
    state: SessionState,
    transaction: TransactionState,
    login_ack: Option<LoginAck>,
    database: Option<String>,
    collation: Option<Collation>,
}

impl Session<TcpStream> {
    /// Open a TCP connection and log in.
    ///
    /// The TCP connect and the whole handshake each run under the configured
    /// connect timeout.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = ?config.database,
            "connecting to SQL Server"
        );

        let addr = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.timeouts.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        stream.set_nodelay(true)?;

        Self::connect_with_transport(stream, config).await
    }
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an open transport without sending anything.
    ///
    /// The session starts [`Disconnected`](SessionState::Disconnected);
    /// [`login`](Self::login) performs the handshake.
    pub fn new(transport: T, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connection: Some(Connection::new(transport)),
            config,
            state: SessionState::Disconnected,
            transaction: TransactionState::default(),
            login_ack: None,
            database: None,
            collation: None,
        })
    }

    /// Log in over an already-open transport.
    pub async fn connect_with_transport(transport: T, config: Config) -> Result<Self> {
        let mut session = Self::new(transport, config)?;
        session.login().await?;
        Ok(session)
    }

    /// Run the pre-login and login exchanges.
    ///
    /// Any failure leaves the session [`Errored`](SessionState::Errored).
    pub async fn login(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::InvalidState {
                operation: "log in",
                state: self.state,
            });
        }

        let result = match timeout(self.config.timeouts.connect_timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout),
        };
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn handshake(&mut self) -> Result<()> {
        self.transition(SessionState::PreLogin);
        let prelogin = PreLogin::new()
            .with_instance(self.config.instance.clone())
            .with_thread_id(std::process::id());
        let response = self.round_trip(PacketType::PreLogin, prelogin.encode()).await?;

        let server = PreLogin::decode(response.payload)?;
        tracing::debug!(
            version = %server.version,
            encryption = ?server.encryption,
            "pre-login response"
        );
        if server.encryption.is_required() {
            return Err(Error::EncryptionRequired);
        }

        self.transition(SessionState::Authenticating);
        let login = self
            .build_login7()
            .encode()
            .map_err(|e| Error::Config(e.to_string()))?;
        let response = self.round_trip(PacketType::Tds7Login, login).await?;
        self.process_login_response(response)?;

        self.transition(SessionState::Ready);
        Ok(())
    }

    fn build_login7(&self) -> Login7 {
        let config = &self.config;
        let packet_size = u32::try_from(config.packet_size).unwrap_or(4096);
        let mut login = Login7::new()
            .with_sql_auth(config.user.clone(), config.password.clone())
            .with_hostname(config.hostname.clone())
            .with_app_name(config.application_name.clone())
            .with_server_name(config.host.clone())
            .with_packet_size(packet_size)
            .with_lcid(config.lcid);
        if let Some(database) = &config.database {
            login = login.with_database(database.clone());
        }
        login
    }

    /// Walk the login response. LOGINACK is required, and any ERROR token
    /// fails the login.
    fn process_login_response(&mut self, message: Message) -> Result<()> {
        let mut ack = None;
        let mut error = None;

        for token in TokenStream::new(message.payload) {
            match token? {
                Token::LoginAck(login_ack) => {
                    tracing::info!(
                        tds_version = %login_ack.tds_version,
                        server = %login_ack.prog_name,
                        server_version = %login_ack.prog_version,
                        "login acknowledged"
                    );
                    ack = Some(login_ack);
                }
                Token::EnvChange(env) => self.apply_env_change(&env),
                Token::Error(message) => {
                    if error.is_none() {
                        error = Some(message);
                    }
                }
                Token::Info(message) => log_info(&message),
                Token::Done(done) if !done.has_more() => break,
                _ => {}
            }
        }

        if let Some(message) = error {
            return Err(Error::authentication(message));
        }
        match ack {
            Some(ack) => {
                self.login_ack = Some(ack);
                Ok(())
            }
            None => Err(Error::Authentication {
                number: 0,
                state: 0,
                class: 0,
                message: "login response carried no LOGINACK".into(),
            }),
        }
    }

    /// Run a SQL batch.
    ///
    /// With autocommit off, a transaction is begun first if none is active.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.ensure_ready("execute")?;
        self.begin_implicit().await?;

        tracing::debug!(sql = sql, "executing batch");
        let payload = encode_sql_batch_with_transaction(sql, self.transaction.descriptor());
        self.run_request(PacketType::SqlBatch, payload).await
    }

    /// Run a parameterized statement through `sp_executesql`.
    ///
    /// Parameters bind positionally to `@p1`, `@p2`, ...
    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        tracing::debug!(sql = sql, params = params.len(), "executing query");
        let params: Vec<RpcParam> = params
            .iter()
            .map(|value| RpcParam::from_value("", value.clone()))
            .collect();
        self.send_rpc("query", RpcRequest::execute_sql(sql, params)).await
    }

    /// Call a stored procedure.
    ///
    /// RETURNSTATUS and output parameters are reported on the result.
    pub async fn callproc(&mut self, name: &str, args: Vec<RpcArg>) -> Result<QueryResult> {
        tracing::debug!(procedure = name, args = args.len(), "calling procedure");
        let request = args
            .into_iter()
            .fold(RpcRequest::named(name), |request, arg| {
                request.param(arg.into_param())
            });
        self.send_rpc("call a procedure", request).await
    }

    /// Encode before anything is sent, so a value that does not fit its
    /// type leaves the session untouched.
    async fn send_rpc(&mut self, operation: &'static str, request: RpcRequest) -> Result<QueryResult> {
        self.ensure_ready(operation)?;
        let mut payload = request
            .encode(self.transaction.descriptor())
            .map_err(Error::encode)?;
        if self.begin_implicit().await? {
            payload = request
                .encode(self.transaction.descriptor())
                .map_err(Error::encode)?;
        }
        self.run_request(PacketType::Rpc, payload).await
    }

    /// Begin a transaction at the configured isolation level.
    ///
    /// Does nothing if a transaction is already active.
    pub async fn begin(&mut self) -> Result<()> {
        self.begin_with_isolation(self.config.isolation_level).await
    }

    /// Begin a transaction at the given isolation level.
    pub async fn begin_with_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.ensure_ready("begin a transaction")?;
        if self.transaction.is_active() {
            return Ok(());
        }

        tracing::debug!(isolation_level = level.name(), "beginning transaction");
        let payload = TransactionRequest::Begin(level).encode(self.transaction.descriptor());
        self.run_request(PacketType::TransactionManager, payload).await?;

        if !self.transaction.is_active() {
            let err = Error::ProtocolViolation(ProtocolError::MalformedToken {
                token: "ENVCHANGE",
                reason: "transaction begin was not acknowledged".into(),
            });
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Commit the active transaction. Does nothing outside a transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.end_transaction(TransactionRequest::Commit).await
    }

    /// Roll back the active transaction. Does nothing outside a transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.end_transaction(TransactionRequest::Rollback).await
    }

    async fn end_transaction(&mut self, request: TransactionRequest) -> Result<()> {
        let operation = match request {
            TransactionRequest::Commit => "commit",
            _ => "roll back",
        };
        self.ensure_ready(operation)?;
        if !self.transaction.is_active() {
            tracing::debug!(operation = operation, "no active transaction");
            return Ok(());
        }

        tracing::debug!(
            descriptor = self.transaction.descriptor(),
            operation = operation,
            "ending transaction"
        );
        let payload = request.encode(self.transaction.descriptor());
        self.run_request(PacketType::TransactionManager, payload).await?;
        Ok(())
    }

    async fn begin_implicit(&mut self) -> Result<bool> {
        if self.config.autocommit || self.transaction.is_active() {
            return Ok(false);
        }
        self.begin().await?;
        Ok(true)
    }

    /// Abort an outstanding request.
    ///
    /// A session is left [`Executing`](SessionState::Executing) when the
    /// future of a request is dropped before its response arrived. This
    /// sends an attention signal, discards the rest of the response up to
    /// the server's acknowledgement and returns the session to
    /// [`Ready`](SessionState::Ready). On a ready session it does nothing.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Executing => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "cancel",
                    state,
                });
            }
        }

        let command_timeout = self.config.timeouts.command_timeout;
        let connection = self.connection("cancel")?;
        let result = match timeout(command_timeout, connection.cancel()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::CommandTimeout),
        };

        match result {
            Ok(()) => {
                self.transition(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Handle for cancelling the running request from another task.
    ///
    /// The interrupted request fails with [`Error::Cancelled`] and the
    /// session stays usable.
    #[must_use]
    pub fn cancel_handle(&self) -> Option<CancelHandle<T>> {
        self.connection.as_ref().map(Connection::cancel_handle)
    }

    /// Close the session.
    ///
    /// Best effort and infallible: an outstanding request is interrupted
    /// with an attention signal, then the transport is shut down. Failures
    /// are logged.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(mut connection) = self.connection.take() {
            if self.state == SessionState::Executing {
                match timeout(self.config.timeouts.command_timeout, connection.cancel()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "attention during close failed"),
                    Err(_) => tracing::warn!("attention during close timed out"),
                }
            }
            if let Err(e) = connection.shutdown().await {
                tracing::warn!(error = %e, "transport shutdown failed");
            }
        }

        self.transition(SessionState::Closed);
        tracing::info!("session closed");
    }

    /// Send one request and collect its whole response.
    async fn run_request(&mut self, packet_type: PacketType, payload: Bytes) -> Result<QueryResult> {
        self.transition(SessionState::Executing);

        let command_timeout = self.config.timeouts.command_timeout;
        let outcome = match timeout(command_timeout, self.round_trip(packet_type, payload)).await {
            Ok(result) => result.and_then(|message| self.collect(message)),
            Err(_) => Err(Error::CommandTimeout),
        };

        match outcome {
            Ok(builder) => {
                self.transition(SessionState::Ready);
                builder.finish()
            }
            Err(e) if e.is_fatal() => {
                self.fail(&e);
                Err(e)
            }
            Err(e) => {
                self.transition(SessionState::Ready);
                Err(e)
            }
        }
    }

    async fn round_trip(&mut self, packet_type: PacketType, payload: Bytes) -> Result<Message> {
        let connection = self.connection("send a request")?;
        connection.send_message(packet_type, payload).await?;
        connection.read_message().await?.ok_or(Error::Cancelled)
    }

    /// Decode a response. Environment changes apply as they are met; any
    /// decoding failure discards everything collected so far.
    fn collect(&mut self, message: Message) -> Result<ResultBuilder> {
        let mut builder = ResultBuilder::new();
        for token in TokenStream::new(message.payload) {
            match token.map_err(Error::decode)? {
                Token::EnvChange(env) => self.apply_env_change(&env),
                Token::Info(message) => {
                    log_info(&message);
                    builder.push(Token::Info(message));
                }
                token => builder.push(token),
            }
        }
        if !builder.is_finished() {
            tracing::debug!("response ended without a final DONE");
        }
        Ok(builder)
    }

    fn apply_env_change(&mut self, env: &EnvChange) {
        match env {
            EnvChange::PacketSize { new, old } => {
                tracing::debug!(new = new, old = old, "packet size changed");
                if let Some(connection) = self.connection.as_mut() {
                    connection.set_packet_size(*new as usize);
                }
            }
            EnvChange::Database { new, .. } => {
                tracing::debug!(database = %new, "database changed");
                self.database = Some(new.clone());
            }
            EnvChange::SqlCollation { new, .. } => {
                tracing::debug!(collation = ?new, "collation changed");
                self.collation = *new;
            }
            EnvChange::Language { new, .. } => {
                tracing::debug!(language = %new, "language changed");
            }
            EnvChange::Routing { host, port } => {
                tracing::debug!(host = %host, port = port, "ignoring routing redirect");
            }
            EnvChange::BeginTransaction { .. }
            | EnvChange::CommitTransaction { .. }
            | EnvChange::RollbackTransaction { .. } => self.transaction.apply(env),
            EnvChange::Other { env_type, .. } => {
                tracing::trace!(env_type = env_type, "ignoring environment change");
            }
        }
    }

    fn connection(&mut self, operation: &'static str) -> Result<&mut Connection<T>> {
        self.connection.as_mut().ok_or(Error::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        if self.state.is_usable() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        tracing::debug!(from = %self.state, to = %next, "session state changed");
        self.state = next;
    }

    fn fail(&mut self, error: &Error) {
        tracing::debug!(error = %error, "session failed");
        self.transition(SessionState::Errored);
    }
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current database, as last reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Default collation reported by the server.
    #[must_use]
    pub fn collation(&self) -> Option<Collation> {
        self.collation
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> Option<usize> {
        self.connection.as_ref().map(Connection::packet_size)
    }

    /// Server product name from LOGINACK.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.login_ack.as_ref().map(|ack| ack.prog_name.as_str())
    }

    /// Server product version from LOGINACK.
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.login_ack.as_ref().map(|ack| ack.prog_version)
    }

    /// TDS version the server accepted.
    #[must_use]
    pub fn tds_version(&self) -> Option<TdsVersion> {
        self.login_ack.as_ref().map(|ack| ack.tds_version)
    }

    /// Check if a transaction is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_active()
    }

    /// Descriptor stamped into outgoing requests; 0 outside a transaction.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction.descriptor()
    }
}

impl<T> std::fmt::Debug for Session<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .field("database", &self.database)
            .field("in_transaction", &self.transaction.is_active())
            .finish_non_exhaustive()
    }
}

fn log_info(message: &ServerMessage) {
    tracing::info!(
        number = message.number,
        class = message.class,
        message = %message.message,
        "server message"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new().user("sa").password("pw")
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let (client, _server) = tokio::io::duplex(1024);
        let session = Session::new(client, config()).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.packet_size(), Some(4096));
        assert!(!session.in_transaction());
        assert!(session.server_name().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (client, _server) = tokio::io::duplex(1024);
        assert!(matches!(
            Session::new(client, Config::new()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_requires_ready() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut session = Session::new(client, config()).unwrap();
        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: SessionState::Disconnected,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let mut session = Session::new(client, config()).unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.cancel_handle().is_none());
    }

    #[tokio::test]
    async fn test_login_against_closed_transport_errors() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let mut session = Session::new(client, config()).unwrap();
        let err = session.login().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Errored);
    }

    #[test]
    fn test_env_change_packet_size() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut session = Session::new(client, config()).unwrap();
        session.apply_env_change(&EnvChange::PacketSize { new: 8000, old: 4096 });
        assert_eq!(session.packet_size(), Some(8000));
        session.apply_env_change(&EnvChange::Database {
            new: "orders".into(),
            old: "master".into(),
        });
        assert_eq!(session.database(), Some("orders"));
    }
}
