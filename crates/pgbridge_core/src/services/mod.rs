//! Connection services.
//!
//! - `connection` - ConnectionService::establish, Session, driver configuration
//! - `ssh_tunnel` - SSH local-forward tunnels
//! - `tls` - TLS options and certificate inspection

pub mod connection;
pub mod ssh_tunnel;
pub mod tls;

pub use connection::{driver_config, Connection, ConnectionService, Session};
pub use ssh_tunnel::{SshAuth, SshForwardConfig, SshTunnelService, TunnelHandle};
pub use tls::{load_optional_file, CertificateInspector, CertificateSummary, TlsOptions};
