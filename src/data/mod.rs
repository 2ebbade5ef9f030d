//! Opaque payload contract
//!
//! The cache never looks inside a payload. It only needs the capabilities of
//! [`Data`]: write yourself into a storage directory, deep-copy yourself, and
//! release your resources. Reading a payload back is the job of the importer
//! attached to its [`DataType`].

pub mod blob;
pub mod merged;
pub mod registry;
pub mod text;

pub use blob::BlobData;
pub use merged::MergedAnnotations;
pub use registry::{ConvertFn, TypeRegistry};
pub use text::TextData;

use crate::cache::DataCache;
use crate::error::Result;
use crate::progress::Progress;
use crate::storage::{ReadStorage, WriteStorage};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

/// Id of the root type every payload converts to
pub const ANY_TYPE_ID: &str = "data";

/// Reads a payload of one type back from its storage directory
pub type ImportFn = fn(&ReadStorage, &DataCache, &Progress) -> Result<Arc<dyn Data>>;

/// Capabilities the cache requires from a payload
pub trait Data: Send + Sync + 'static {
    /// The true type of this payload
    fn data_type(&self) -> DataType;

    /// Write this payload into `storage`
    ///
    /// `name` is a suggested file name; with `force_name` it must be used as-is.
    fn export(
        &self,
        storage: &WriteStorage,
        name: &str,
        force_name: bool,
        progress: &Progress,
    ) -> Result<()>;

    /// Deep copy
    fn duplicate(&self, progress: &Progress) -> Result<Arc<dyn Data>>;

    /// Release resources held by this payload
    fn close(&self) {}

    /// Short human-readable description
    fn display_string(&self) -> String;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct DataTypeInfo {
    id: String,
    name: String,
    importer: Option<ImportFn>,
}

/// Type tag of a payload: id, display name and importer
///
/// Two types are equal when their ids are equal.
#[derive(Clone)]
pub struct DataType {
    info: Arc<DataTypeInfo>,
}

static ANY_TYPE: LazyLock<DataType> =
    LazyLock::new(|| DataType::abstract_type(ANY_TYPE_ID, "Data"));

impl DataType {
    pub fn new(id: impl Into<String>, name: impl Into<String>, importer: ImportFn) -> Self {
        Self {
            info: Arc::new(DataTypeInfo {
                id: id.into(),
                name: name.into(),
                importer: Some(importer),
            }),
        }
    }

    /// A type without importer; payloads can be converted to it but never read back as it
    pub fn abstract_type(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: Arc::new(DataTypeInfo {
                id: id.into(),
                name: name.into(),
                importer: None,
            }),
        }
    }

    /// The root type
    pub fn any() -> Self {
        ANY_TYPE.clone()
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_any(&self) -> bool {
        self.info.id == ANY_TYPE_ID
    }

    pub fn is_importable(&self) -> bool {
        self.info.importer.is_some()
    }

    /// Read a payload of this type from `storage`
    pub fn import(
        &self,
        storage: &ReadStorage,
        cache: &DataCache,
        progress: &Progress,
    ) -> Result<Arc<dyn Data>> {
        match self.info.importer {
            Some(importer) => importer(storage, cache, progress),
            None => Err(crate::error::Error::Codec {
                type_id: self.id().to_string(),
                reason: "type has no importer".to_string(),
            }),
        }
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for DataType {}

impl Hash for DataType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info.id.hash(state);
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.info.id)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info.name)
    }
}

/// Downcast a payload to its concrete type
pub fn downcast<T: Data>(data: Arc<dyn Data>) -> Option<Arc<T>> {
    data.into_any().downcast::<T>().ok()
}
