use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// spillway - Disk-spillable data cache and annotated data tables
///
/// Inspect, copy and slice saved data tables, and manage the spill area
/// that holds payloads moved out of memory.
#[derive(Parser, Debug)]
#[command(name = "spillway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disk-spillable data cache and annotated data tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Configuration arguments of the selected command, if it takes any
    pub fn common_config_args(&self) -> Option<&CommonConfigArgs> {
        match &self.command {
            Commands::Table(args) => Some(&args.common),
            Commands::Cache(args) => Some(&args.common),
            Commands::Config(args) => match &args.command {
                ConfigCommands::Show { common } => Some(common),
                _ => None,
            },
        }
    }
}

/// Common configuration arguments shared across commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "SPILLWAY_CONFIG", global = true)]
    pub config: Option<String>,

    /// Spill area directory
    #[arg(long, env = "SPILLWAY_CONFIG_CACHE_DIR", global = true)]
    pub config_cache_dir: Option<String>,

    /// Spill items to disk (true|false)
    #[arg(long, env = "SPILLWAY_CONFIG_VIRTUALIZATION", global = true)]
    pub config_virtualization: Option<bool>,

    /// Remove stale spill directories on start (true|false)
    #[arg(long, env = "SPILLWAY_CONFIG_CLEAN_ON_START", global = true)]
    pub config_clean_on_start: Option<bool>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "SPILLWAY_CONFIG_LOG_LEVEL", global = true)]
    pub config_log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and transform saved data tables
    Table(TableArgs),

    /// Manage the spill area
    Cache(CacheArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct TableArgs {
    #[command(subcommand)]
    pub command: TableCommands,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum TableCommands {
    /// Show row count, accepted type, columns and per-row types
    Info {
        /// Saved table directory
        dir: PathBuf,

        /// Print the table metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the flat CSV view of a saved table
    Csv {
        /// Saved table directory
        dir: PathBuf,
    },

    /// Load a table and save it again
    Copy {
        /// Source table directory
        src: PathBuf,

        /// Destination directory
        dst: PathBuf,

        /// Move every item through the spill area before saving
        #[arg(long)]
        spill: bool,
    },

    /// Save a subset of rows as a new table
    Slice {
        /// Source table directory
        src: PathBuf,

        /// Destination directory
        dst: PathBuf,

        /// Row indices, comma-separated, in output order
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<usize>,
    },
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show spill area statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every spill directory
    Clean,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: String,
    },
    /// Print an example config file
    Example,
    /// Show effective configuration (merged from all sources)
    Show {
        #[command(flatten)]
        common: CommonConfigArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slice_rows() {
        let cli = Cli::try_parse_from(["spillway", "table", "slice", "a", "b", "--rows", "3,0"]).unwrap();
        match cli.command {
            Commands::Table(TableArgs {
                command: TableCommands::Slice { rows, .. },
                ..
            }) => assert_eq!(rows, vec![3, 0]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from([
            "spillway",
            "cache",
            "stats",
            "--config-cache-dir",
            "/tmp/spill",
        ])
        .unwrap();
        let common = cli.common_config_args().unwrap();
        assert_eq!(common.config_cache_dir.as_deref(), Some("/tmp/spill"));
    }

    #[test]
    fn test_config_validate_has_no_common_args() {
        let cli = Cli::try_parse_from(["spillway", "config", "validate", "spillway.toml"]).unwrap();
        assert!(cli.common_config_args().is_none());
    }
}
