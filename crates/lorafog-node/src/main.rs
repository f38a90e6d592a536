//! LoraFog Node - runs the hub, gateway relays and vehicle agents
//!
//! One YAML file describes the whole deployment; `--role` picks which part
//! of it this process runs.

mod system;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lorafog_core::SystemConfig;
use system::{Role, System};

#[derive(Parser)]
#[command(name = "lorafog-node")]
#[command(about = "LoraFog relay and registry node")]
struct Args {
    /// Deployment configuration file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    /// Components to run
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SystemConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate()?;

    info!(
        config = %args.config.display(),
        gateways = config.gateways.len(),
        vehicles = config.vehicles.len(),
        "Starting LoraFog node"
    );

    let mut system = System::new(config, args.role);
    if let Err(e) = system.start().await {
        system.stop().await;
        return Err(e);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
    system.stop().await;

    Ok(())
}
