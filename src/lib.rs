// Library interface for spillway
// Integration tests and embedding applications use these modules directly

pub mod annotation;
pub mod cache;
pub mod config;
pub mod config_discovery;
pub mod data;
pub mod error;
pub mod item;
pub mod logging;
pub mod progress;
pub mod storage;
pub mod table;

// Re-export commonly used types
pub use annotation::{DataAnnotation, DataMergeMode, TextAnnotation, TextMergeMode};
pub use cache::{CacheOptions, DataCache};
pub use data::{Data, DataType, TypeRegistry};
pub use error::{Error, Result};
pub use item::{HolderId, ItemStatus, VirtualItem};
pub use progress::Progress;
pub use table::AnnotatedTable;
