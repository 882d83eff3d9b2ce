//! Error types for connection establishment.
//!
//! Every failure propagates to the caller immediately; nothing here retries.
//! A missing *required* file (the SSH private key) is a hard `FileRead` error,
//! while missing *optional* certificate files never reach this type at all.

use crate::services::ssh_tunnel::TunnelHandle;

use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for establishing and using a database connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// SSH handshake, authentication, or local bind failed.
    #[error("SSH tunnel error: {message}")]
    Tunnel {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<BoxError>,
    },

    /// The database driver could not open a session.
    ///
    /// If a tunnel was opened for this attempt it travels back with the error
    /// and stays open until the caller stops or drops it.
    #[error("Session error: {message}")]
    Session {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<BoxError>,
        /// Tunnel opened for this attempt, if any.
        tunnel: Option<TunnelHandle>,
    },

    /// A required file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    FileRead {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Certificate material was present but unusable.
    #[error("TLS error: {message}")]
    Tls {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<BoxError>,
    },

    /// Error reported by the database while running a statement.
    #[error("Database error: {message}")]
    Database {
        /// PostgreSQL error message.
        message: String,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<BoxError>,
    },

    /// A session call exceeded the configured query timeout.
    #[error("Query timeout after {elapsed_ms}ms")]
    QueryTimeout {
        /// Timeout that elapsed, in milliseconds.
        elapsed_ms: u64,
    },

    /// Malformed connection parameters.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },
}

impl ConnectionError {
    // ========== Constructors ==========

    /// Create a new tunnel error.
    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel { message: message.into(), source: None }
    }

    /// Create a new tunnel error with source.
    pub fn tunnel_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tunnel { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new session error with source. The tunnel is attached later.
    pub fn session_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Session { message: message.into(), source: Some(Box::new(source)), tunnel: None }
    }

    /// Create a new file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead { path: path.into(), source }
    }

    /// Create a new TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls { message: message.into(), source: None }
    }

    /// Create a new TLS error with source.
    pub fn tls_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tls { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a query timeout error.
    pub fn query_timeout(elapsed_ms: u64) -> Self {
        Self::QueryTimeout { elapsed_ms }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    // ========== Methods ==========

    /// Hand a tunnel back to the caller through a session failure.
    ///
    /// Other variants drop the tunnel, which stops it.
    pub fn with_tunnel(mut self, handle: Option<TunnelHandle>) -> Self {
        if let Self::Session { tunnel, .. } = &mut self {
            *tunnel = handle;
        }
        self
    }

    /// Take the tunnel carried by a session failure, if any.
    pub fn take_tunnel(&mut self) -> Option<TunnelHandle> {
        match self {
            Self::Session { tunnel, .. } => tunnel.take(),
            _ => None,
        }
    }

    /// Check if this error came from the SSH tunnel.
    pub fn is_tunnel(&self) -> bool {
        matches!(self, Self::Tunnel { .. })
    }

    /// Check if this error came from opening the database session.
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Tunnel { .. } => "Tunnel",
            Self::Session { .. } => "Session",
            Self::FileRead { .. } => "FileRead",
            Self::Tls { .. } => "TLS",
            Self::Database { .. } => "Database",
            Self::QueryTimeout { .. } => "Timeout",
            Self::Config { .. } => "Config",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Tunnel { .. } => Some("Check the SSH host, port and credentials"),
            Self::Session { .. } => Some("Check that the database server is running"),
            Self::FileRead { .. } => Some("Check that the file exists and is readable"),
            Self::Tls { .. } => Some("Verify SSL certificate configuration"),
            Self::Database { .. } => None,
            Self::QueryTimeout { .. } => Some("Increase the query request timeout"),
            Self::Config { .. } => None,
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Convert from tokio_postgres::Error raised by a running session.
impl From<tokio_postgres::Error> for ConnectionError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = Some(db_err.code().code().to_string());
            return ConnectionError::Database { message, code, source: Some(Box::new(err)) };
        }

        if err.is_closed() {
            return ConnectionError::Database {
                message: "Connection closed".to_string(),
                code: None,
                source: Some(Box::new(err)),
            };
        }

        ConnectionError::Database { message: err.to_string(), code: None, source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error raised while loading parameters.
impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        ConnectionError::Config { message: format!("Invalid connection parameters: {err}") }
    }
}

/// Type alias for Result with ConnectionError.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
