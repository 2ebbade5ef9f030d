/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// This module handles merging configuration from multiple sources:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables
/// 3. Configuration file
/// 4. Built-in defaults (lowest priority)
use anyhow::Result;
use spillway::cache::CacheOptions;
use spillway::config::{CacheConfig, ObservabilityConfig, SpillwayConfig};
use spillway::config_discovery::load_config_with_discovery;
use std::path::PathBuf;

use crate::cli::CommonConfigArgs;

/// Effective configuration of one invocation
#[derive(Debug, Clone)]
pub struct MergedConfig {
    /// File the configuration was read from, if any
    pub source: Option<PathBuf>,
    pub cache_dir: String,
    pub virtualization: bool,
    pub clean_on_start: bool,
    pub log_level: String,
    pub log_format: String,
}

impl MergedConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &CommonConfigArgs, file_config: Option<SpillwayConfig>) -> Self {
        let file = file_config.unwrap_or_default();

        Self {
            source: None,
            cache_dir: args
                .config_cache_dir
                .clone()
                .unwrap_or_else(|| file.cache.dir.clone()),
            virtualization: args
                .config_virtualization
                .unwrap_or(file.cache.virtualization),
            clean_on_start: args
                .config_clean_on_start
                .unwrap_or(file.cache.clean_on_start),
            log_level: args
                .config_log_level
                .clone()
                .unwrap_or_else(|| file.observability.log_level.clone()),
            log_format: file.observability.log_format.clone(),
        }
    }

    /// Discover the config file (or use `--config`) and merge it with `args`
    pub fn load(args: &CommonConfigArgs) -> Result<Self> {
        let discovered = load_config_with_discovery(args.config.as_deref())?;
        let (source, file_config) = match discovered {
            Some((path, config)) => (Some(path), Some(config)),
            None => (None, None),
        };

        let mut merged = Self::merge(args, file_config);
        merged.source = source;
        Ok(merged)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            dir: Some(PathBuf::from(&self.cache_dir)),
            virtualization: self.virtualization,
            clean_on_start: self.clean_on_start,
        }
    }

    /// The merged values as a config file
    pub fn to_config(&self) -> SpillwayConfig {
        SpillwayConfig {
            cache: CacheConfig {
                dir: self.cache_dir.clone(),
                virtualization: self.virtualization,
                clean_on_start: self.clean_on_start,
            },
            observability: ObservabilityConfig {
                log_level: self.log_level.clone(),
                log_format: self.log_format.clone(),
            },
        }
    }
}

impl Default for MergedConfig {
    fn default() -> Self {
        Self::merge(&CommonConfigArgs::default(), None)
    }
}
