mod cli;
mod cli_utils;
mod commands;
mod merger;

use anyhow::Result;
use clap::Parser;
use spillway::logging;

use cli::{Cli, Commands};
use merger::MergedConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Merge configuration before logging so the configured level applies
    let config = match cli.common_config_args() {
        Some(args) => MergedConfig::load(args)?,
        None => MergedConfig::default(),
    };

    // Initialize structured logging
    logging::init(&config.log_level, Some(&config.log_format));
    if let Some(source) = &config.source {
        tracing::debug!("[spillway] Using config: {}", source.display());
    }

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Table(args) => commands::table::run(args, config).await,
        Commands::Cache(args) => commands::cache::run(&args, &config).await,
        Commands::Config(args) => commands::config::run(args.command),
    }
}
