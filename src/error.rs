use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the cache, the table model and table persistence
#[derive(Error, Debug)]
pub enum Error {
    #[error("Data item was already closed: {display}")]
    UseAfterFree { display: String },

    #[error("Tried to add data of type '{found}', but the table only accepts '{expected}'. A converter could not be found.")]
    TypeMismatch { found: String, expected: String },

    #[error("I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed table storage at {}: {reason}", path.display())]
    MalformedStorage { path: PathBuf, reason: String },

    #[error("Row {row} is out of bounds (table has {row_count} rows)")]
    RowOutOfBounds { row: usize, row_count: usize },

    #[error("Data in row {row} was destroyed")]
    DataDestroyed { row: usize },

    #[error("Codec for '{type_id}' failed: {reason}")]
    Codec { type_id: String, reason: String },
}

impl Error {
    /// Wrap an I/O error together with the path that was accessed
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::MalformedStorage {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// The path involved in the failure, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::Io { path, .. } | Error::MalformedStorage { path, .. } => Some(path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = Error::io(
            "/tmp/spill/item-1",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.path(), Some(Path::new("/tmp/spill/item-1")));
        assert!(err.to_string().contains("/tmp/spill/item-1"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = Error::TypeMismatch {
            found: "text".to_string(),
            expected: "blob".to_string(),
        };
        assert!(err.to_string().contains("'text'"));
        assert!(err.path().is_none());
    }
}
