//! UsageLens CLI - live AI usage and quota dashboard
//!
//! Wires the core poll engine, telemetry pipeline and overlay into a
//! long-running `watch` loop plus a few one-shot commands.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use usagelens_core::config::{config_path, expand_path, CONFIG_PATH_ENV};
use usagelens_core::db::DB_PATH_ENV;
use usagelens_core::AppConfig;

#[derive(Parser)]
#[command(name = "usagelens")]
#[command(author, version, about = "Live AI usage and quota dashboard", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override config file path (or set USAGELENS_CONFIG env var)
    #[arg(long, env = CONFIG_PATH_ENV, global = true)]
    config: Option<String>,

    /// Override database path (or set USAGELENS_DB_PATH env var)
    #[arg(long, env = DB_PATH_ENV, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every account and keep a live table on screen
    Watch(commands::watch::WatchArgs),

    /// Run one telemetry collect + flush pass
    Collect(commands::collect::CollectArgs),

    /// Resolve a raw model name to its canonical identity
    Canonical(commands::canonical::CanonicalArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config_path = match &cli.config {
        Some(path) => expand_path(path),
        None => config_path()?,
    };
    let mut config = AppConfig::load_from(&config_path)?;

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        config.db_path = Some(db_path.clone());
    }

    let ctx = commands::Context {
        config,
        config_path,
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Watch(args) => commands::watch::execute(&ctx, args).await,
        Commands::Collect(args) => commands::collect::execute(&ctx, args).await,
        Commands::Canonical(args) => commands::canonical::execute(&ctx, args),
        Commands::Config { action } => commands::config::execute(&ctx, action),
    }
}
