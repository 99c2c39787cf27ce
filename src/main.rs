use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use notifyd::bootstrap::Server;
use notifyd::config::Config;
use notifyd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "notifyd")]
#[command(author, version, about = "Notification delivery daemon with channel fallback")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    // Initialize tracing with config-based settings
    let tracing_config = TracingConfig::from_settings(&config.settings);
    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting notifyd"
    );

    info!(
        channels = config.channels.len(),
        primary = %config.delivery.primary,
        admin_address = %config.admin.address,
        "configuration loaded"
    );

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    // Create and run server
    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
