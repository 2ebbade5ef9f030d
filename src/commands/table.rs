/// `spillway table` command implementation
///
/// Inspects saved tables and rewrites them through a data cache.
use anyhow::{Context, Result};
use spillway::cache::DataCache;
use spillway::data::TypeRegistry;
use spillway::progress::Progress;
use spillway::table::{self, TableInfo};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cli::{TableArgs, TableCommands};
use crate::cli_utils::spillway_prefix;
use crate::merger::MergedConfig;

pub async fn run(args: TableArgs, config: MergedConfig) -> Result<()> {
    match args.command {
        TableCommands::Info { dir, json } => info_cmd(&dir, json),
        TableCommands::Csv { dir } => csv_cmd(&dir),
        TableCommands::Copy { src, dst, spill } => {
            tokio::task::spawn_blocking(move || copy(&config, &src, &dst, spill))
                .await
                .context("Table copy task panicked")?
        }
        TableCommands::Slice { src, dst, rows } => {
            tokio::task::spawn_blocking(move || slice(&config, &src, &dst, &rows))
                .await
                .context("Table slice task panicked")?
        }
    }
}

fn read_info(dir: &Path) -> Result<TableInfo> {
    table::read_info(dir).with_context(|| format!("Failed to read table: {}", dir.display()))
}

fn info_cmd(dir: &Path, json: bool) -> Result<()> {
    let info = read_info(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let text_columns = info.text_columns();
    let data_columns = info.data_columns();

    println!("Table: {}", dir.display());
    println!("  Rows: {}", info.row_count());
    println!("  Accepted type: {}", info.accepted_type_id);
    println!("  Format version: {}", info.format_version);
    println!("  Text annotations: {}", join_or_none(&text_columns));
    println!("  Data annotations: {}", join_or_none(&data_columns));

    if !info.rows.is_empty() {
        println!();
        println!("Rows:");
        for row in &info.rows {
            println!(
                "  {:>4}  {}  ({} text, {} data)",
                row.index,
                row.true_data_type,
                row.text_annotations.len(),
                row.data_annotations.len()
            );
        }
    }

    Ok(())
}

fn csv_cmd(dir: &Path) -> Result<()> {
    let info = read_info(dir)?;
    let stdout = std::io::stdout();
    info.write_csv(stdout.lock())
        .context("Failed to write CSV to stdout")?;
    Ok(())
}

fn open_cache(config: &MergedConfig) -> Result<Arc<DataCache>> {
    DataCache::open(TypeRegistry::with_builtins(), &config.cache_options())
        .with_context(|| format!("Failed to open data cache: {}", config.cache_dir))
}

fn copy(config: &MergedConfig, src: &Path, dst: &Path, spill: bool) -> Result<()> {
    let cache = open_cache(config)?;
    let progress = Progress::new();

    let loaded = table::load(&cache, src, &progress)
        .with_context(|| format!("Failed to load table: {}", src.display()))?;
    if spill {
        loaded
            .spill_all(&progress)
            .context("Failed to spill table items")?;
    }
    table::save(&loaded, dst, &progress)
        .with_context(|| format!("Failed to save table: {}", dst.display()))?;

    info!("Copied {} rows to {}", loaded.row_count(), dst.display());
    println!(
        "{} Copied {} ({} rows) to {}",
        spillway_prefix(),
        src.display(),
        loaded.row_count(),
        dst.display()
    );
    Ok(())
}

fn slice(config: &MergedConfig, src: &Path, dst: &Path, rows: &[usize]) -> Result<()> {
    let cache = open_cache(config)?;
    let progress = Progress::new();

    let loaded = table::load(&cache, src, &progress)
        .with_context(|| format!("Failed to load table: {}", src.display()))?;
    let sliced = loaded.slice(rows).context("Failed to slice table")?;
    table::save(&sliced, dst, &progress)
        .with_context(|| format!("Failed to save table: {}", dst.display()))?;

    println!(
        "{} Saved {} of {} rows to {}",
        spillway_prefix(),
        sliced.row_count(),
        loaded.row_count(),
        dst.display()
    );
    Ok(())
}

fn join_or_none(columns: &[String]) -> String {
    if columns.is_empty() {
        "(none)".to_string()
    } else {
        columns.join(", ")
    }
}
