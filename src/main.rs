//! wsbridge - WebSocket to TCP Bridge
//!
//! Lets clients that can only speak WebSocket reach any TCP endpoint:
//! `GET /proxy?address=host:port` upgrades to a WebSocket whose binary
//! messages are relayed to and from that address.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsbridge::{config::ConfigManager, BridgeServer, ShutdownCoordinator};

/// CLI arguments for wsbridge
#[derive(Parser, Debug)]
#[command(name = "wsbridge")]
#[command(about = "wsbridge - WebSocket to TCP bridge")]
#[command(version)]
#[command(long_about = "
wsbridge - WebSocket to TCP bridge

Accepts WebSocket upgrade requests of the form
  GET /proxy?address=host:port
connects to the target and relays data in both directions until either side
closes.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  WSBRIDGE_BIND_ADDR          - Bind address (e.g., 0.0.0.0:8080)
  WSBRIDGE_READ_TIMEOUT       - Liveness window (e.g., 60s)
  WSBRIDGE_HANDSHAKE_TIMEOUT  - Upgrade handshake timeout (e.g., 30s)
  WSBRIDGE_BUFFER_SIZE        - Read buffer size in bytes
  WSBRIDGE_LOG_LEVEL          - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:8080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Bridge endpoint path (overrides config file)
    #[arg(long, help = "Bridge endpoint path (e.g., /proxy)")]
    pub path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Liveness window in seconds
    #[arg(long, help = "Liveness window in seconds")]
    pub read_timeout: Option<u64>,

    /// Buffer size in bytes
    #[arg(long, help = "Buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Configuration priority: CLI args > environment > config file > defaults
    let mut config = ConfigManager::load(&args.config, |key| std::env::var(key).ok())?;

    init_tracing(&args, &config.monitoring.log_level)?;

    info!("Starting wsbridge v{}", env!("CARGO_PKG_VERSION"));
    if args.config.exists() {
        info!("Configuration loaded from: {}", args.config.display());
    } else {
        warn!(
            "Configuration file not found at {}, using environment and defaults",
            args.config.display()
        );
    }

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.path.as_deref(),
        args.read_timeout,
        args.buffer_size,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Bridge path: {}?{}=host:port", config.server.path, config.server.address_param);
        info!("  Handshake timeout: {:?}", config.session.handshake_timeout);
        info!("  Read timeout: {:?}", config.session.read_timeout);
        info!("  Ping period: {:?}", config.session.effective_ping_period());
        info!("  Buffer size: {} bytes", config.session.buffer_size);
        info!(
            "  Metrics: {}",
            if config.monitoring.metrics_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new();
    let server = BridgeServer::new(config, shutdown.token())?;

    if let Err(e) = server.run(shutdown).await {
        error!("Server error: {:#}", e);
        return Err(e);
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, configured_level: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(configured_level)
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
