//! pgbridge - open a secured PostgreSQL session the way a host application would.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgbridge_core::logging::{init_logging, log_dir, LogConfig};
use pgbridge_core::{ConnectionInfo, ConnectionService, DiagnosticLogger, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;

/// Keys redacted from logged connection parameters.
const DEFAULT_HIDDEN_KEYS: [&str; 5] =
    ["userPassword", "password", "passphrase", "ssh_password", "ssh_key_passphrase"];

/// Open a PostgreSQL session over an optional SSH tunnel and TLS
#[derive(Parser, Debug)]
#[command(name = "pgbridge")]
#[command(version)]
struct Cli {
    /// Log filter, overriding PGBRIDGE_LOG and RUST_LOG (e.g. "pgbridge_core=debug")
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect with parameters from a JSON file and print the server version
    Connect {
        /// Connection parameters (camelCase JSON)
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Extra keys to redact from logged parameters
        #[arg(long = "hide", value_delimiter = ',')]
        hidden_keys: Vec<String>,

        /// Version reported as "Application version"
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        app_version: String,
    },
    /// Print the environment diagnostics report
    Diagnostics {
        /// Version reported as "Application version"
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        app_version: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(log_dir());
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    let _logging_guard = init_logging(log_config);

    match cli.command {
        Command::Connect { config, hidden_keys, app_version } => {
            connect(config, hidden_keys, &app_version).await
        }
        Command::Diagnostics { app_version } => {
            let logger = DiagnosticLogger::new("pgbridge", Arc::new(TracingSink));
            print!("{}", logger.render_diagnostics(&app_version));
            Ok(())
        }
    }
}

async fn connect(config: PathBuf, hidden_keys: Vec<String>, app_version: &str) -> Result<()> {
    let logger = DiagnosticLogger::new("PostgreSQL", Arc::new(TracingSink)).with_hidden_keys(
        DEFAULT_HIDDEN_KEYS.iter().map(|key| key.to_string()).chain(hidden_keys),
    );

    print!("{}", logger.render_diagnostics(app_version));

    let info = ConnectionInfo::from_json_file(&config)
        .with_context(|| format!("Failed to load connection parameters from {}", config.display()))?;
    logger.info("Connection info", serde_json::to_value(&info)?);
    logger.progress("Connecting", info.database_name(), None);

    let connection = match ConnectionService::establish(&info, &logger).await {
        Ok(connection) => connection,
        Err(mut err) => {
            logger.error(&err);
            if let Some(tunnel) = err.take_tunnel() {
                tunnel.stop();
            }
            return Err(err).context(format!("Failed to connect to {}", info.display_url()));
        }
    };

    let rows = connection.session.query("SELECT version()", &[]).await?;
    if let Some(row) = rows.first() {
        let version: String = row.try_get(0).context("Unexpected version() result")?;
        println!("{version}");
    }

    connection.close().await;
    tracing::info!("Disconnected");
    Ok(())
}
