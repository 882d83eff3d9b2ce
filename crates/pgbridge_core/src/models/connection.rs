//! Connection parameters supplied by the host application.
//!
//! `ConnectionInfo` is read-only input. Deriving a tunneled variant goes
//! through [`ConnectionInfo::with_host`], which returns a new value.

use crate::error::{ConnectionError, ConnectionResult};
use crate::models::tls::TlsMode;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local endpoint of every SSH tunnel.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Connect, query and statement timeout when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Application name reported to PostgreSQL when the host sets none.
pub const DEFAULT_APPLICATION_NAME: &str = "pgbridge";

/// Raw timeout value as the host stores it: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestTimeout {
    /// Milliseconds as a JSON number.
    Millis(f64),
    /// Milliseconds as text, e.g. `"5000"`.
    Text(String),
}

impl RequestTimeout {
    /// Milliseconds, if the value is a positive finite number.
    pub fn as_millis(&self) -> Option<u64> {
        let value = match self {
            Self::Millis(ms) => *ms,
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
        };

        (value.is_finite() && value > 0.0).then(|| value.ceil() as u64)
    }
}

impl From<u64> for RequestTimeout {
    fn from(ms: u64) -> Self {
        Self::Millis(ms as f64)
    }
}

impl From<&str> for RequestTimeout {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// SSH authentication method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuthMethod {
    /// Password authentication
    Password { password: Option<String> },
    /// Private key file authentication
    PrivateKey {
        /// Path to the private key (required; a missing file is an error)
        key_file: PathBuf,
        /// Passphrase for an encrypted key
        passphrase: Option<String>,
    },
}

impl Default for SshAuthMethod {
    fn default() -> Self {
        Self::Password { password: None }
    }
}

/// SSH gateway settings.
///
/// On the wire these are the flat `ssh`, `ssh_host`, `ssh_port`, `ssh_user`, `ssh_method`,
/// `ssh_key_file`, `ssh_key_passphrase` and `ssh_password` keys of the connection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HostSshFields", into = "HostSshFields")]
pub struct SshInfo {
    /// Whether to tunnel through the gateway
    pub enabled: bool,
    /// SSH server hostname
    pub host: String,
    /// SSH server port (default 22)
    pub port: u16,
    /// SSH username
    pub user: String,
    /// Authentication method
    pub auth: SshAuthMethod,
}

impl Default for SshInfo {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 22,
            user: String::new(),
            auth: SshAuthMethod::default(),
        }
    }
}

/// SSH keys as the host application writes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct HostSshFields {
    ssh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_key_passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_password: Option<String>,
}

impl From<HostSshFields> for SshInfo {
    fn from(fields: HostSshFields) -> Self {
        // Anything but "privateKey" means password auth.
        let auth = match fields.ssh_method.as_deref() {
            Some("privateKey") => SshAuthMethod::PrivateKey {
                key_file: fields.ssh_key_file.unwrap_or_default(),
                passphrase: fields.ssh_key_passphrase.filter(|p| !p.is_empty()),
            },
            _ => SshAuthMethod::Password { password: fields.ssh_password },
        };

        Self {
            enabled: fields.ssh,
            host: fields.ssh_host.unwrap_or_default(),
            port: fields.ssh_port.unwrap_or(22),
            user: fields.ssh_user.unwrap_or_default(),
            auth,
        }
    }
}

impl From<SshInfo> for HostSshFields {
    fn from(info: SshInfo) -> Self {
        let mut fields = Self {
            ssh: info.enabled,
            ssh_host: Some(info.host),
            ssh_port: Some(info.port),
            ssh_user: Some(info.user),
            ..Default::default()
        };
        match info.auth {
            SshAuthMethod::Password { password } => {
                fields.ssh_method = Some("password".to_string());
                fields.ssh_password = password;
            }
            SshAuthMethod::PrivateKey { key_file, passphrase } => {
                fields.ssh_method = Some("privateKey".to_string());
                fields.ssh_key_file = Some(key_file);
                fields.ssh_key_passphrase = passphrase;
            }
        }
        fields
    }
}

impl SshInfo {
    /// Enabled gateway with password authentication.
    pub fn password(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            user: user.into(),
            auth: SshAuthMethod::Password { password: Some(password.into()) },
            ..Default::default()
        }
    }

    /// Enabled gateway with private key authentication.
    pub fn private_key(
        host: impl Into<String>,
        user: impl Into<String>,
        key_file: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            user: user.into(),
            auth: SshAuthMethod::PrivateKey { key_file: key_file.into(), passphrase },
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Everything needed to reach and authenticate to a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionInfo {
    /// Server hostname or IP
    pub host: String,
    /// Server port (default 5432)
    pub port: u16,
    /// Login username
    pub user_name: String,
    /// Login password
    pub user_password: Option<String>,
    /// Database name
    pub database: Option<String>,
    /// Used when `database` is absent or empty
    pub maintenance_database: Option<String>,
    /// TLS mode, possibly a legacy value
    pub ssl_type: Option<String>,
    /// CA certificate (PEM)
    pub cert_authority: Option<PathBuf>,
    /// Client certificate (PEM)
    pub client_cert: Option<PathBuf>,
    /// Client private key (PEM)
    pub client_private_key: Option<PathBuf>,
    /// Timeout in milliseconds
    pub query_request_timeout: Option<RequestTimeout>,
    /// Application name sent to PostgreSQL
    pub application_name: Option<String>,
    /// SSH tunnel settings
    #[serde(flatten)]
    pub ssh: SshInfo,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user_name: String::new(),
            user_password: None,
            database: None,
            maintenance_database: None,
            ssl_type: None,
            cert_authority: None,
            client_cert: None,
            client_private_key: None,
            query_request_timeout: None,
            application_name: None,
            ssh: SshInfo::default(),
        }
    }
}

impl ConnectionInfo {
    /// Create connection parameters with the required fields.
    pub fn new(host: impl Into<String>, port: u16, user_name: impl Into<String>) -> Self {
        Self { host: host.into(), port, user_name: user_name.into(), ..Default::default() }
    }

    /// Parse parameters from the host's JSON representation.
    pub fn from_json_str(json: &str) -> ConnectionResult<Self> {
        let info: Self = serde_json::from_str(json)?;
        info.validate()?;
        Ok(info)
    }

    /// Load parameters from a JSON file.
    pub fn from_json_file(path: &Path) -> ConnectionResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConnectionError::file_read(path, e))?;
        Self::from_json_str(&json)
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.user_password = Some(password.into());
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the TLS mode.
    pub fn with_ssl_type(mut self, ssl_type: impl Into<String>) -> Self {
        self.ssl_type = Some(ssl_type.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: impl Into<RequestTimeout>) -> Self {
        self.query_request_timeout = Some(timeout.into());
        self
    }

    /// Set the SSH tunnel.
    pub fn with_ssh(mut self, ssh: SshInfo) -> Self {
        self.ssh = ssh;
        self
    }

    /// Copy of these parameters pointing at another host. Port is kept.
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self { host: host.into(), ..self.clone() }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::config("Host is required"));
        }
        if self.port == 0 {
            return Err(ConnectionError::config("Port must be between 1 and 65535"));
        }
        if self.ssh.enabled {
            if self.ssh.host.trim().is_empty() {
                return Err(ConnectionError::config("SSH host is required when SSH is enabled"));
            }
            if self.ssh.port == 0 {
                return Err(ConnectionError::config("SSH port must be between 1 and 65535"));
            }
        }
        Ok(())
    }

    /// Database to open, falling back to the maintenance database.
    pub fn database_name(&self) -> Option<&str> {
        self.database
            .as_deref()
            .filter(|db| !db.is_empty())
            .or_else(|| self.maintenance_database.as_deref().filter(|db| !db.is_empty()))
    }

    /// Resolved timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.query_request_timeout
            .as_ref()
            .and_then(RequestTimeout::as_millis)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Resolved timeout, applied to connect, query and statement alike.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms())
    }

    /// Application name reported to the server.
    pub fn application_name(&self) -> &str {
        self.application_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_APPLICATION_NAME)
    }

    /// TLS mode after legacy normalization.
    pub fn tls_mode(&self) -> TlsMode {
        self.ssl_type.as_deref().map(TlsMode::parse).unwrap_or(TlsMode::Disabled)
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user_name,
            self.host,
            self.port,
            self.database_name().unwrap_or_default()
        )
    }
}
