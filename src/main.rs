//! TCP transport daemon.
//!
//! Loads a TOML configuration, builds the connection registry, binds the
//! configured listening addresses and serves accepted connections until
//! Ctrl+C or SIGTERM. SIGHUP and edits to the config file reload it.

use std::path::PathBuf;

use clap::Parser;

use tcp_transport::config::{load_config, TransportConfig};
use tcp_transport::lifecycle;
use tcp_transport::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "tcp-transport", version, about = "Managed TCP transport daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };

    logging::init_logging(config.observability.log_json);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcp-transport starting");
    tracing::info!(
        listen = ?config.listener.addresses,
        connect_timeout_ms = config.connect.timeout_ms,
        connect_attempts = config.connect.attempts,
        tls = config.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let daemon = lifecycle::start(config, args.config).await?;
    daemon.run().await?;
    Ok(())
}
