pub mod spill_area;

pub use spill_area::{SpillArea, SpillStats};

use crate::error::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directory handed to a payload codec for writing
///
/// `internal_path` is the location relative to the storage root, which is
/// what table metadata records (e.g. `_0/3`).
#[derive(Debug, Clone)]
pub struct WriteStorage {
    root: PathBuf,
    internal: PathBuf,
}

impl WriteStorage {
    /// Open a storage rooted at `root`, creating the directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self {
            root,
            internal: PathBuf::new(),
        })
    }

    /// Sub-storage; the directory is created immediately
    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<Self> {
        let internal = self.internal.join(name);
        let path = self.root.join(&internal);
        fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            root: self.root.clone(),
            internal,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.internal)
    }

    pub fn internal_path(&self) -> &Path {
        &self.internal
    }

    /// Write a whole file inside this storage
    pub fn write_file(&self, file_name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.path().join(file_name);
        fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}

/// Directory handed to a payload codec for reading
#[derive(Debug, Clone)]
pub struct ReadStorage {
    root: PathBuf,
    internal: PathBuf,
}

impl ReadStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "storage directory not found"),
            ));
        }
        Ok(Self {
            root,
            internal: PathBuf::new(),
        })
    }

    pub fn resolve(&self, name: impl AsRef<Path>) -> Self {
        Self {
            root: self.root.clone(),
            internal: self.internal.join(name),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.internal)
    }

    pub fn internal_path(&self) -> &Path {
        &self.internal
    }

    /// First file (in name order) with the given extension
    pub fn find_file(&self, extension: &str) -> Result<Option<PathBuf>> {
        let dir = self.path();
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                matches.push(path);
            }
        }

        matches.sort();
        Ok(matches.into_iter().next())
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::io(path, e))
    }
}

/// Replace characters that are unsafe in file names
pub fn make_filesystem_compatible(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `folder` names a location strictly below a storage root
pub fn is_relative_folder(folder: &str) -> bool {
    let path = Path::new(folder);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}
