use crate::data::TypeRegistry;
use crate::error::Result;
use crate::storage::SpillArea;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::logging::{operations, status};

/// Options for opening a [`DataCache`]
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Spill area root; a temporary directory when unset
    pub dir: Option<PathBuf>,
    /// Global virtualization policy; spilling is a no-op when false
    pub virtualization: bool,
    /// Remove leftover backing directories from earlier runs
    pub clean_on_start: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            dir: None,
            virtualization: true,
            clean_on_start: false,
        }
    }
}

/// Shared environment of one cache instance
///
/// Holds the type registry used for conversion and import, and the spill
/// area items are spilled into. Tables keep an `Arc` to it; spilled items
/// keep one for reading their payload back.
pub struct DataCache {
    registry: TypeRegistry,
    spill_area: SpillArea,
}

impl DataCache {
    pub fn new(registry: TypeRegistry, spill_area: SpillArea) -> Arc<Self> {
        Arc::new(Self {
            registry,
            spill_area,
        })
    }

    /// Open a cache with the given registry
    pub fn open(registry: TypeRegistry, options: &CacheOptions) -> Result<Arc<Self>> {
        let spill_area = match &options.dir {
            Some(dir) => SpillArea::new(dir)?,
            None => SpillArea::temporary()?,
        };

        if options.clean_on_start {
            spill_area.clean()?;
        }
        spill_area.set_enabled(options.virtualization);

        info!(
            operation = operations::OPEN,
            status = status::SUCCESS,
            root = %spill_area.root().display(),
            virtualization = options.virtualization,
            "opened data cache"
        );

        Ok(Self::new(registry, spill_area))
    }

    /// Cache with the built-in types in a temporary spill area
    pub fn temporary() -> Result<Arc<Self>> {
        Ok(Self::new(
            TypeRegistry::with_builtins(),
            SpillArea::temporary()?,
        ))
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn spill_area(&self) -> &SpillArea {
        &self.spill_area
    }

    pub fn virtualization_enabled(&self) -> bool {
        self.spill_area.is_enabled()
    }

    pub fn set_virtualization_enabled(&self, enabled: bool) {
        self.spill_area.set_enabled(enabled);
    }
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field("spill_root", &self.spill_area.root())
            .field("virtualization", &self.virtualization_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_cleans_stale_dirs() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("spill");
        std::fs::create_dir_all(dir.join("item-stale")).unwrap();

        let options = CacheOptions {
            dir: Some(dir.clone()),
            virtualization: false,
            clean_on_start: true,
        };
        let cache = DataCache::open(TypeRegistry::with_builtins(), &options).unwrap();

        assert!(!dir.join("item-stale").exists());
        assert!(!cache.virtualization_enabled());
        assert_eq!(cache.spill_area().root(), dir.as_path());
    }
}
