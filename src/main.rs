//! CLI entry point for the acquirer tool.

use acquirer_core::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse before tracing so --help works without logs
    let args = Args::parse();

    let (config, config_path) = Config::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;

    // Priority: RUST_LOG > -q/-v flags > config log_level > info
    let default_level = if args.quiet {
        "error".to_string()
    } else {
        match args.verbose {
            0 => config.log_level.clone().unwrap_or_else(|| "info".to_string()),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, config_path = ?config_path, "CLI arguments parsed");
    info!(version = env!("CARGO_PKG_VERSION"), "Acquirer starting");

    match &args.command {
        Command::Run => commands::run_scheduler_command(&config).await,
        Command::Search(search) => commands::run_search_command(&config, search).await,
        Command::Test => commands::run_test_command(&config).await,
        Command::Sync => commands::run_sync_command(&config).await,
        Command::CheckConfig => {
            commands::run_check_config_command(&config, config_path.as_deref())
        }
    }
}
