use super::{Data, DataType};
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::storage::{make_filesystem_compatible, ReadStorage, WriteStorage};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::sync::{Arc, LazyLock};

pub const BLOB_TYPE_ID: &str = "blob";

static BLOB_TYPE: LazyLock<DataType> =
    LazyLock::new(|| DataType::new(BLOB_TYPE_ID, "Binary data", BlobData::import));

/// Raw bytes, stored as a single `<name>.bin` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobData {
    bytes: Vec<u8>,
}

impl BlobData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn data_type() -> DataType {
        BLOB_TYPE.clone()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex-encoded SHA256 of the contents
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    fn import(storage: &ReadStorage, _cache: &DataCache, _progress: &Progress) -> Result<Arc<dyn Data>> {
        let file = storage.find_file("bin")?.ok_or_else(|| Error::Codec {
            type_id: BLOB_TYPE_ID.to_string(),
            reason: format!("no .bin file in {}", storage.path().display()),
        })?;
        Ok(Arc::new(Self::new(storage.read_file(&file)?)))
    }
}

impl Data for BlobData {
    fn data_type(&self) -> DataType {
        Self::data_type()
    }

    fn export(
        &self,
        storage: &WriteStorage,
        name: &str,
        force_name: bool,
        _progress: &Progress,
    ) -> Result<()> {
        let stem = if force_name {
            name.to_string()
        } else {
            make_filesystem_compatible(name)
        };
        storage.write_file(&format!("{}.bin", stem), &self.bytes)?;
        Ok(())
    }

    fn duplicate(&self, _progress: &Progress) -> Result<Arc<dyn Data>> {
        Ok(Arc::new(self.clone()))
    }

    fn display_string(&self) -> String {
        format!("{} bytes (sha256:{})", self.bytes.len(), &self.digest()[..12])
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
