//! Dormitory helper daemon
//!
//! Serves laundry and kitchen reservations over REST, identifies callers with
//! auto-provisioned short-lived identities, and sweeps expired identities in
//! the background.

use clap::Parser;
use dorm_daemon::config::{ConfigError, ConfigIssue};
use dorm_daemon::error::DaemonResult;
use dorm_daemon::{DormConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dormitory helper daemon CLI
#[derive(Parser)]
#[command(name = "dormd")]
#[command(about = "Dormitory helper - laundry and kitchen reservations", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DORM_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides server.listen_addr
    #[arg(short, long, env = "DORM_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides logging.level
    #[arg(long, env = "DORM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DORM_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DormConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.parse().map_err(|e| {
            ConfigError::Invalid(vec![ConfigIssue::new(
                "server.listen_addr",
                format!("invalid listen address: {}", e),
            )])
        })?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "Starting dormd"
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
