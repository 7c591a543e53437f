//! Client configuration.

use std::time::Duration;

use tds_protocol::packet::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE};

use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

/// Timeout configuration.
///
/// Transport timeouts are fatal to the session: TDS offers no way to resume
/// a half-read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection and complete login (default: 15s).
    pub connect_timeout: Duration,
    /// Time to wait for a complete response to a request (default: 30s).
    pub command_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Session configuration.
///
/// ```
/// use mssql_client::Config;
///
/// let config = Config::new()
///     .host("db.internal")
///     .user("app")
///     .password("Secret123")
///     .database("orders")
///     .packet_size(8192);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// SQL Server login name.
    pub user: String,

    /// SQL Server login password.
    pub password: String,

    /// Initial database; the login's default database when unset.
    pub database: Option<String>,

    /// Instance name sent in pre-login (default: `MSSQLServer`).
    pub instance: String,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Client host name sent in Login7.
    pub hostname: String,

    /// Requested TDS packet size.
    pub packet_size: usize,

    /// Client locale id (default: 1033, en-US).
    pub lcid: u32,

    /// Isolation level used when the session begins a transaction.
    pub isolation_level: IsolationLevel,

    /// When false, `execute` and `callproc` run inside a transaction that
    /// the caller ends with `commit` or `rollback`.
    pub autocommit: bool,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            database: None,
            instance: "MSSQLServer".to_string(),
            application_name: "mssql-client".to_string(),
            hostname: String::new(),
            packet_size: DEFAULT_PACKET_SIZE,
            lcid: 1033,
            isolation_level: IsolationLevel::ReadCommitted,
            autocommit: false,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the instance name sent in pre-login.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the requested packet size, clamped to `512..=32767`.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Set the client locale id.
    #[must_use]
    pub fn lcid(mut self, lcid: u32) -> Self {
        self.lcid = lcid;
        self
    }

    /// Set the isolation level for transactions the session begins.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Enable or disable autocommit.
    #[must_use]
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.command_timeout = timeout;
        self
    }

    /// Check that the configuration can be used to log in.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("user must not be empty".into()));
        }
        Ok(())
    }
}
