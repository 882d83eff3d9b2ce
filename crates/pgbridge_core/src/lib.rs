//! Secured PostgreSQL connection establishment for host applications.
//!
//! This crate opens database sessions on behalf of a host:
//!
//! - **error**: `ConnectionError` with tunnel/session/file failure kinds
//! - **models**: `ConnectionInfo`, SSH settings, TLS mode normalization
//! - **services**: SSH tunnel, TLS options and the connection establisher
//! - **diagnostics**: logger shim over a host sink, environment report
//! - **logging**: structured `tracing` setup

pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use diagnostics::{
    DiagnosticLogger, LogLevel, LogSink, RecordingSink, SinkRecord, SystemSnapshot, TracingSink,
    PLUGIN_VERSION,
};
pub use error::{ConnectionError, ConnectionResult};
pub use models::{
    normalize_ssl_type, CertificateBundle, ConnectionInfo, RequestTimeout, SshAuthMethod, SshInfo,
    TlsMode,
};
pub use services::{
    Connection, ConnectionService, Session, SshAuth, SshForwardConfig, SshTunnelService,
    TlsOptions, TunnelHandle,
};
