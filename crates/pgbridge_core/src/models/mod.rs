//! Data models for connection establishment.
//!
//! - `connection` - ConnectionInfo, SshInfo, SshAuthMethod, RequestTimeout
//! - `tls` - TlsMode, legacy mode normalization, CertificateBundle

pub mod connection;
pub mod tls;

pub use connection::{
    ConnectionInfo, RequestTimeout, SshAuthMethod, SshInfo, DEFAULT_APPLICATION_NAME,
    DEFAULT_TIMEOUT_MS, LOOPBACK_HOST,
};
pub use tls::{normalize_ssl_type, CertificateBundle, TlsMode};
