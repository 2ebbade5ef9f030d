use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::logging::{operations, status};

const ITEM_PREFIX: &str = "item-";

/// Scratch directory that hands out one backing directory per spilled item
///
/// Layout:
/// - `<root>/item-XXXXXX/` - backing directory of one item, filled by the
///   payload codec
///
/// The `enabled` flag is the global virtualization policy: when it is off,
/// spilling is a no-op for every item using this area.
#[derive(Debug)]
pub struct SpillArea {
    root: PathBuf,
    enabled: AtomicBool,
    // Keeps a temporary root alive (and deletes it on drop)
    _temp: Option<TempDir>,
}

/// Spill area usage
#[derive(Debug, Clone)]
pub struct SpillStats {
    pub total_items: u64,
    pub total_bytes: u64,
    pub root: PathBuf,
}

impl SpillArea {
    /// Root used when no directory is configured: `spillway/spill` inside the
    /// platform cache directory, or `.spillway/spill` when there is none
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("spillway"))
            .unwrap_or_else(|| PathBuf::from(".spillway"))
            .join("spill")
    }

    /// Open a spill area rooted at `root`, creating the directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;

        Ok(Self {
            root,
            enabled: AtomicBool::new(true),
            _temp: None,
        })
    }

    /// Spill area inside a fresh temporary directory, removed on drop
    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("spillway-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;

        Ok(Self {
            root: temp.path().to_path_buf(),
            enabled: AtomicBool::new(true),
            _temp: Some(temp),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Allocate a new, empty backing directory
    pub fn allocate(&self) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(ITEM_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| Error::io(&self.root, e))?;
        let path = dir.keep();
        debug!(
            operation = operations::ALLOCATE,
            path = %path.display(),
            "allocated spill directory"
        );
        Ok(path)
    }

    /// Delete a backing directory; a missing directory is not an error
    pub fn release(path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Count backing directories and their bytes
    pub fn stats(&self) -> Result<SpillStats> {
        let mut total_items = 0u64;
        let mut total_bytes = 0u64;

        for entry in walkdir::WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                Error::io(path, io::Error::other(e.to_string()))
            })?;

            if entry.depth() == 1 && entry.file_type().is_dir() && is_item_dir(entry.path()) {
                total_items += 1;
            } else if entry.file_type().is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total_bytes += metadata.len();
                }
            }
        }

        Ok(SpillStats {
            total_items,
            total_bytes,
            root: self.root.clone(),
        })
    }

    /// Remove every backing directory; returns how many were removed
    ///
    /// Only safe when no item of this area is still spilled.
    pub fn clean(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let path = entry.path();
            if path.is_dir() && is_item_dir(&path) {
                Self::release(&path)?;
                removed += 1;
            }
        }

        info!(
            operation = operations::CLEAN,
            status = status::SUCCESS,
            removed,
            root = %self.root.display(),
            "cleaned spill area"
        );
        Ok(removed)
    }
}

fn is_item_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(ITEM_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_root_is_dedicated() {
        let root = SpillArea::default_root();
        assert!(root.ends_with(Path::new("spillway").join("spill")));
    }

    #[test]
    fn test_allocate_and_stats() {
        let temp = TempDir::new().unwrap();
        let area = SpillArea::new(temp.path().join("spill")).unwrap();

        let first = area.allocate().unwrap();
        let second = area.allocate().unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(area.root()));

        fs::write(first.join("data.bin"), b"hello").unwrap();

        let stats = area.stats().unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.total_bytes, 5);

        assert_eq!(area.clean().unwrap(), 2);
        assert_eq!(area.stats().unwrap().total_items, 0);
    }

    #[test]
    fn test_release_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        assert!(SpillArea::release(&temp.path().join("gone")).is_ok());
    }

    #[test]
    fn test_temporary_area_removed_on_drop() {
        let area = SpillArea::temporary().unwrap();
        let root = area.root().to_path_buf();
        assert!(root.is_dir());
        drop(area);
        assert!(!root.exists());
    }

    #[test]
    fn test_policy_flag() {
        let area = SpillArea::temporary().unwrap();
        assert!(area.is_enabled());
        area.set_enabled(false);
        assert!(!area.is_enabled());
    }
}
