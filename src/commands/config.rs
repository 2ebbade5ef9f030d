use anyhow::Result;
use spillway::config::SpillwayConfig;
use spillway::config_discovery::hash_config;
use tracing::info;

use crate::cli::{CommonConfigArgs, ConfigCommands};
use crate::merger::MergedConfig;

pub fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Example => example(),
        ConfigCommands::Show { common } => show(&common),
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = SpillwayConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!("  - Cache directory: {}", config.cache.dir);
    println!("  - Virtualization: {}", config.cache.virtualization);
    println!("  - Clean on start: {}", config.cache.clean_on_start);
    println!(
        "  - Logging: {} ({})",
        config.observability.log_level, config.observability.log_format
    );

    Ok(())
}

fn example() -> Result<()> {
    println!("{}", SpillwayConfig::example()?);
    Ok(())
}

fn show(common: &CommonConfigArgs) -> Result<()> {
    info!("Showing effective configuration");

    let merged = MergedConfig::load(common)?;

    match &merged.source {
        Some(path) => println!("# Source: {} ({})", path.display(), hash_config(path)?),
        None => println!("# Source: defaults"),
    }
    println!("{}", toml::to_string_pretty(&merged.to_config())?);

    Ok(())
}
