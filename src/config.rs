use crate::cache::CacheOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete spillway configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpillwayConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Spill area configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Spill area directory
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Spill items to disk at all
    #[serde(default = "default_true")]
    pub virtualization: bool,

    /// Remove stale spill directories when a cache is opened
    #[serde(default)]
    pub clean_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            virtualization: true,
            clean_on_start: false,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_cache_dir() -> String {
    crate::storage::SpillArea::default_root()
        .to_string_lossy()
        .into_owned()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}

impl SpillwayConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: SpillwayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Example configuration as TOML string
    pub fn example() -> Result<String> {
        let config = SpillwayConfig {
            cache: CacheConfig {
                dir: "/var/tmp/spillway".to_string(),
                virtualization: true,
                clean_on_start: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "compact".to_string(),
            },
        };

        toml::to_string_pretty(&config).context("Failed to serialize example config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.dir.is_empty() {
            anyhow::bail!("cache.dir must be set");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        if crate::logging::LogFormat::parse(&self.observability.log_format).is_none() {
            anyhow::bail!("observability.log_format must be one of: pretty, compact, json");
        }

        Ok(())
    }

    /// Options for opening the data cache described by this configuration
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            dir: Some(PathBuf::from(&self.cache.dir)),
            virtualization: self.cache.virtualization,
            clean_on_start: self.cache.clean_on_start,
        }
    }
}
