/// `spillway cache` command implementation
///
/// Reports on and cleans the spill area.
use anyhow::{Context, Result};
use serde_json::json;
use spillway::storage::SpillArea;

use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{format_bytes, spillway_prefix};
use crate::merger::MergedConfig;

pub async fn run(args: &CacheArgs, config: &MergedConfig) -> Result<()> {
    let area = SpillArea::new(&config.cache_dir)
        .with_context(|| format!("Failed to open spill area: {}", config.cache_dir))?;

    match &args.command {
        CacheCommands::Stats { json } => stats(&area, *json),
        CacheCommands::Clean => clean(&area),
    }
}

fn stats(area: &SpillArea, json: bool) -> Result<()> {
    let stats = area.stats().context("Failed to read spill area")?;

    if json {
        let value = json!({
            "root": stats.root.display().to_string(),
            "total_items": stats.total_items,
            "total_bytes": stats.total_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Spill area: {}", stats.root.display());
    println!("  Spilled items: {}", stats.total_items);
    println!("  Total size: {}", format_bytes(stats.total_bytes));
    Ok(())
}

fn clean(area: &SpillArea) -> Result<()> {
    let removed = area.clean().context("Failed to clean spill area")?;

    if removed == 0 {
        println!("{} Spill area is already empty", spillway_prefix());
    } else {
        println!(
            "{} Removed {} spilled item{}",
            spillway_prefix(),
            removed,
            if removed == 1 { "" } else { "s" }
        );
    }
    Ok(())
}
