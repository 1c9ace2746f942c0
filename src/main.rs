//! Waypoint CLI: validate a configuration or run the monitors against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use waypoint::error::{EXIT_FATAL, EXIT_SUCCESS};
use waypoint::{logging, report, Services, WaypointConfig, WaypointError};

/// Resilience and monitoring layer for travel-supplier calls.
#[derive(Parser, Debug)]
#[command(name = "waypoint", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a configuration file, then print a summary
    Validate {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "waypoint.toml")]
        config: PathBuf,
    },

    /// Start the watchdog and business monitor until Ctrl-C
    Run {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "waypoint.toml")]
        config: PathBuf,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS as u8),
        Err(err) => {
            eprintln!("❌ {:#}", err);
            let code = err
                .downcast_ref::<WaypointError>()
                .map(WaypointError::exit_code)
                .unwrap_or(EXIT_FATAL);
            ExitCode::from(code as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Validate { config } => validate(config),
        Command::Run { config, verbose } => run(config, verbose).await,
    }
}

fn load(path: &Path) -> Result<WaypointConfig> {
    WaypointConfig::load(path).with_context(|| format!("Loading {}", path.display()))
}

fn validate(path: PathBuf) -> Result<()> {
    let config = load(&path)?;

    println!("✓ {} is valid\n", path.display());
    if config.dependencies.is_empty() {
        println!("No dependencies configured; unregistered suppliers use [defaults].\n");
    } else {
        println!("{}\n", report::dependency_table(&config));
    }
    println!("{}", report::sentinel_table(&config));
    Ok(())
}

async fn run(path: PathBuf, verbose: bool) -> Result<()> {
    let mut config = load(&path)?;
    config.logging.verbose |= verbose;
    logging::init_logging(&config.logging)?;

    info!("🚀 Waypoint v{}", waypoint::VERSION);
    let mut services = Services::from_config(&config)?;
    services.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    services.shutdown();
    Ok(())
}
