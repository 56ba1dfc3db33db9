//! strmsync CLI - Command-line interface for strmsync
//!
//! Provides commands for:
//! - Traversing a backend and cataloguing its media files
//! - Inspecting and validating the configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strmsync_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{config::ConfigCommand, scan::ScanCommand};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "strmsync", version, about = "Mirror cloud drive media trees into a catalog")]
struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Traverse a backend and catalogue its media files
    Scan(ScanCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Log filter directive: `-v` flags win over the configured level.
fn log_filter(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let filter = log_filter(cli.verbose, &config.logging.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Scan(cmd) => cmd.execute(&config, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}
