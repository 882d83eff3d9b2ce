//! Connection establishment: optional SSH tunnel, TLS options, database session.

use crate::diagnostics::DiagnosticLogger;
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{ConnectionInfo, LOOPBACK_HOST};
use crate::services::ssh_tunnel::{SshForwardConfig, SshTunnelService, TunnelHandle};
use crate::services::tls::TlsOptions;

use std::future::Future;
use std::time::Duration;
use rustls::ClientConfig;
use tokio::task::JoinHandle;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Row, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;

/// A live session and the tunnel it runs through.
///
/// The tunnel must be kept for as long as the session is used.
#[derive(Debug)]
pub struct Connection {
    pub session: Session,
    pub tunnel: Option<TunnelHandle>,
}

impl Connection {
    /// Close the session, then stop the tunnel.
    pub async fn close(self) {
        self.session.close().await;
        if let Some(tunnel) = self.tunnel {
            tunnel.stop();
        }
    }
}

/// Live database session.
pub struct Session {
    client: Client,
    driver: JoinHandle<()>,
    query_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.client.is_closed())
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl Session {
    /// Open a session, over TLS when a client configuration is given.
    pub async fn connect(
        config: &Config,
        tls: Option<ClientConfig>,
        query_timeout: Duration,
    ) -> ConnectionResult<Self> {
        match tls {
            None => Self::connect_with(config, NoTls, query_timeout).await,
            Some(client_config) => {
                Self::connect_with(config, MakeRustlsConnect::new(client_config), query_timeout).await
            }
        }
    }

    async fn connect_with<T>(config: &Config, tls: T, query_timeout: Duration) -> ConnectionResult<Self>
    where
        T: MakeTlsConnect<Socket> + Send + 'static,
        T::Stream: Send + 'static,
        T::TlsConnect: Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|e| ConnectionError::session_with_source("Failed to open database session", e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "Database connection closed with error");
            }
        });

        Ok(Self { client, driver, query_timeout })
    }

    /// Run a statement returning rows.
    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> ConnectionResult<Vec<Row>> {
        self.bounded(self.client.query(statement, params)).await
    }

    /// Run a statement, returning the number of rows affected.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> ConnectionResult<u64> {
        self.bounded(self.client.execute(statement, params)).await
    }

    /// Server version string, e.g. `16.2`.
    pub async fn server_version(&self) -> ConnectionResult<String> {
        let row = self.bounded(self.client.query_one("SHOW server_version", &[])).await?;
        Ok(row.try_get(0)?)
    }

    /// Whether the driver connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Close the session and wait for the driver task to finish.
    pub async fn close(self) {
        let Self { client, driver, .. } = self;
        drop(client);
        if let Err(e) = driver.await {
            tracing::warn!(error = %e, "Database driver task failed");
        }
    }

    async fn bounded<F, T>(&self, call: F) -> ConnectionResult<T>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, call).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::query_timeout(self.query_timeout.as_millis() as u64)),
        }
    }
}

/// Driver configuration for the given parameters.
///
/// One resolved timeout bounds connect, statements and session calls.
pub fn driver_config(info: &ConnectionInfo) -> Config {
    let mut config = Config::new();
    config
        .host(&info.host)
        .port(info.port)
        .user(&info.user_name)
        .application_name(info.application_name())
        .connect_timeout(info.timeout())
        .keepalives(true)
        .options(format!("-c statement_timeout={}", info.timeout_ms()))
        .ssl_mode(info.tls_mode().driver_ssl_mode());

    if let Some(password) = &info.user_password {
        config.password(password);
    }
    if let Some(database) = info.database_name() {
        config.dbname(database);
    }

    config
}

/// Establishes database connections.
pub struct ConnectionService;

impl ConnectionService {
    /// Open a session, tunneling over SSH first if configured.
    ///
    /// Single attempt. Certificate material is loaded before the tunnel opens,
    /// so the only failure with a tunnel up is a session failure, which
    /// returns the tunnel inside the error.
    pub async fn establish(
        info: &ConnectionInfo,
        logger: &DiagnosticLogger,
    ) -> ConnectionResult<Connection> {
        info.validate()?;

        let tls = TlsOptions::resolve(info, logger)?.client_config()?;
        let forward = if info.ssh.enabled {
            Some(SshForwardConfig::from_connection_info(info)?)
        } else {
            None
        };

        let (tunnel, target) = match forward {
            Some(forward) => {
                let tunnel = SshTunnelService::open(&forward).await?;
                (Some(tunnel), info.with_host(LOOPBACK_HOST))
            }
            None => (None, info.clone()),
        };

        let config = driver_config(&target);

        tracing::info!(
            url = %target.display_url(),
            tls = %target.tls_mode(),
            tunneled = tunnel.is_some(),
            "Opening database session"
        );

        match Session::connect(&config, tls, target.timeout()).await {
            Ok(session) => {
                tracing::info!(url = %target.display_url(), "Database session established");
                Ok(Connection { session, tunnel })
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to establish database session");
                Err(err.with_tunnel(tunnel))
            }
        }
    }
}
