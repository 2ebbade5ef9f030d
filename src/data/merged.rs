use super::{Data, DataType};
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::item::{HolderId, VirtualItem};
use crate::logging::{operations, status};
use crate::progress::Progress;
use crate::storage::{is_relative_folder, ReadStorage, WriteStorage};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::warn;

pub const MERGED_TYPE_ID: &str = "merged-annotations";

const MANIFEST_FILE: &str = "merged-annotations.json";

static MERGED_TYPE: LazyLock<DataType> = LazyLock::new(|| {
    DataType::new(
        MERGED_TYPE_ID,
        "Merged data annotations",
        MergedAnnotations::import,
    )
});

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    rows: Vec<ManifestRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestRow {
    folder: String,
    #[serde(rename = "true-data-type")]
    true_data_type: String,
}

/// Several data annotations that collided on one name, kept side by side
///
/// Each value stays a shared [`VirtualItem`]; this payload registers itself
/// as a user of every row and releases them when closed or dropped.
///
/// Stored as `merged-annotations.json` plus one numbered folder per row.
pub struct MergedAnnotations {
    rows: Vec<VirtualItem>,
    holder: HolderId,
    released: AtomicBool,
}

impl MergedAnnotations {
    pub fn new(rows: Vec<VirtualItem>) -> Self {
        let holder = HolderId::next();
        for row in &rows {
            row.add_user(holder);
        }
        Self {
            rows,
            holder,
            released: AtomicBool::new(false),
        }
    }

    pub fn data_type() -> DataType {
        MERGED_TYPE.clone()
    }

    pub fn rows(&self) -> &[VirtualItem] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for row in &self.rows {
            if let Err(e) = row.release(self.holder) {
                warn!(
                    operation = operations::CLOSE,
                    status = status::ERROR,
                    "failed to close merged annotation value: {}",
                    e
                );
            }
        }
    }

    fn import(storage: &ReadStorage, cache: &DataCache, progress: &Progress) -> Result<Arc<dyn Data>> {
        let manifest_path = storage.path().join(MANIFEST_FILE);
        let bytes = storage.read_file(&manifest_path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| Error::Codec {
            type_id: MERGED_TYPE_ID.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(entry) = manifest.rows.iter().find(|e| !is_relative_folder(&e.folder)) {
            return Err(Error::malformed(
                &manifest_path,
                format!("invalid row folder '{}'", entry.folder),
            ));
        }

        let total = manifest.rows.len();
        let mut rows = Vec::with_capacity(total);
        for (index, entry) in manifest.rows.iter().enumerate() {
            let row_progress = progress.resolve_and_log("Merged value", index, total);
            let data_type = cache
                .registry()
                .get_by_id(&entry.true_data_type)
                .ok_or_else(|| Error::Codec {
                    type_id: MERGED_TYPE_ID.to_string(),
                    reason: format!("unknown data type '{}'", entry.true_data_type),
                })?;
            let payload = data_type.import(&storage.resolve(&entry.folder), cache, &row_progress)?;
            rows.push(VirtualItem::wrap(payload));
        }

        Ok(Arc::new(Self::new(rows)))
    }
}

impl Data for MergedAnnotations {
    fn data_type(&self) -> DataType {
        Self::data_type()
    }

    fn export(
        &self,
        storage: &WriteStorage,
        name: &str,
        force_name: bool,
        progress: &Progress,
    ) -> Result<()> {
        let total = self.rows.len();
        let mut manifest = Manifest {
            rows: Vec::with_capacity(total),
        };

        for (index, row) in self.rows.iter().enumerate() {
            let row_progress = progress.resolve_and_log("Merged value", index, total);
            let folder = index.to_string();
            let payload = row.get(&row_progress)?;
            payload.export(&storage.resolve(&folder)?, name, force_name, &row_progress)?;
            manifest.rows.push(ManifestRow {
                folder,
                true_data_type: row.data_type().id().to_string(),
            });
        }

        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Codec {
            type_id: MERGED_TYPE_ID.to_string(),
            reason: e.to_string(),
        })?;
        storage.write_file(MANIFEST_FILE, json)?;
        Ok(())
    }

    fn duplicate(&self, progress: &Progress) -> Result<Arc<dyn Data>> {
        let rows = self
            .rows
            .iter()
            .map(|row| row.duplicate(progress))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Self::new(rows)))
    }

    fn close(&self) {
        self.release();
    }

    fn display_string(&self) -> String {
        format!("Merged ({} items)", self.rows.len())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for MergedAnnotations {
    fn drop(&mut self) {
        self.release();
    }
}
