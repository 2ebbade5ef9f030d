use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SpillwayConfig;

pub const CONFIG_FILE_NAME: &str = "spillway.toml";

/// Discovers spillway configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/spillway/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Short fingerprint of a configuration file
pub fn hash_config(config_path: &Path) -> Result<String> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();

    Ok(format!("{:x}", result)[..16].to_string())
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up directory tree from cwd.
///
/// Returns the path the configuration came from, or Ok(None) if no config
/// is found.
pub fn load_config_with_discovery(
    explicit_path: Option<&str>,
) -> Result<Option<(PathBuf, SpillwayConfig)>> {
    if let Some(config_path) = explicit_path {
        let path = PathBuf::from(config_path);
        let config = SpillwayConfig::from_file(&path)?;
        return Ok(Some((path, config)));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    match discover_config(&current_dir)? {
        Some(discovered_path) => {
            let config = SpillwayConfig::from_file(&discovered_path)?;
            Ok(Some((discovered_path, config)))
        }
        None => Ok(None),
    }
}
