//! Directory format of a saved table
//!
//! ```text
//! <dir>/
//!   data-table.json     row metadata, read back by `load`
//!   data-table.csv      flat view of the same metadata
//!   0/ 1/ ...           main data of each row
//!   _0/3/ ...           data annotation column 0, row 3
//! ```
//!
//! Payload bytes are written by each type's own export and read back by the
//! importer registered for the recorded type id.

use super::AnnotatedTable;
use crate::annotation::{DataAnnotation, DataMergeMode, TextAnnotation, TextMergeMode};
use crate::cache::DataCache;
use crate::data::DataType;
use crate::error::{Error, Result};
use crate::item::VirtualItem;
use crate::logging::{operations, status};
use crate::progress::Progress;
use crate::storage::{is_relative_folder, ReadStorage, WriteStorage};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const FORMAT_VERSION: u32 = 1;
pub const JSON_FILE: &str = "data-table.json";
pub const CSV_FILE: &str = "data-table.csv";

/// Contents of `data-table.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableInfo {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub accepted_type_id: String,
    pub rows: Vec<RowInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RowInfo {
    pub index: usize,
    pub true_data_type: String,
    #[serde(default)]
    pub text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    pub data_annotations: Vec<DataAnnotationInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataAnnotationInfo {
    pub name: String,
    /// Relative to the table directory, e.g. `_0/3`
    pub row_storage_folder: String,
    pub true_data_type: String,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl TableInfo {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Text annotation names in order of first appearance
    pub fn text_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for annotation in self.rows.iter().flat_map(|r| &r.text_annotations) {
            if !columns.contains(&annotation.name) {
                columns.push(annotation.name.clone());
            }
        }
        columns
    }

    /// Data annotation names in order of first appearance
    pub fn data_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for annotation in self.rows.iter().flat_map(|r| &r.data_annotations) {
            if !columns.contains(&annotation.name) {
                columns.push(annotation.name.clone());
            }
        }
        columns
    }

    /// Write the flat CSV view
    ///
    /// Columns: `index`, `true-data-type`, one `$<name>` column per data
    /// annotation holding `"<folder> [<type id>]"`, then one column per text
    /// annotation. Missing values are empty cells.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let text_columns = self.text_columns();
        let data_columns = self.data_columns();

        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec!["index".to_string(), "true-data-type".to_string()];
        header.extend(data_columns.iter().map(|name| format!("${}", name)));
        header.extend(text_columns.iter().cloned());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.index.to_string(), row.true_data_type.clone()];
            for name in &data_columns {
                let cell = row
                    .data_annotations
                    .iter()
                    .find(|a| &a.name == name)
                    .map(|a| format!("{} [{}]", a.row_storage_folder, a.true_data_type))
                    .unwrap_or_default();
                record.push(cell);
            }
            for name in &text_columns {
                let cell = row
                    .text_annotations
                    .iter()
                    .find(|a| &a.name == name)
                    .map(|a| a.value.clone())
                    .unwrap_or_default();
                record.push(cell);
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Save `table` into `dir`
///
/// Row folders and metadata of a table previously saved into `dir` are
/// removed first; other files are left alone. Fails with `DataDestroyed` if
/// a row has no data any more.
pub fn save(table: &AnnotatedTable, dir: &Path, progress: &Progress) -> Result<()> {
    if let Some(row) = (0..table.row_count()).find(|&row| table.item(row).is_err()) {
        return Err(Error::DataDestroyed { row });
    }

    let storage = WriteStorage::new(dir)?;
    remove_saved_table(dir)?;
    let progress = progress.resolve("Save table");
    let total = table.row_count();

    let mut info = TableInfo {
        format_version: FORMAT_VERSION,
        accepted_type_id: table.accepted_type().id().to_string(),
        rows: Vec::with_capacity(total),
    };

    for row in 0..total {
        let row_progress = progress.resolve_and_log("Row", row, total);
        let item = table.item(row)?;
        let payload = item.get(&row_progress)?;
        payload.export(&storage.resolve(row.to_string())?, "data", false, &row_progress)?;

        let mut data_annotations = Vec::new();
        for (column, name) in table.data_columns().iter().enumerate() {
            let Some(annotation) = table.data_annotation_item(row, name)? else {
                continue;
            };
            let annotation_progress = row_progress.resolve(format!("Data annotation '{}'", name));
            let folder = format!("_{}/{}", column, row);
            let annotation_storage = storage.resolve(format!("_{}", column))?.resolve(row.to_string())?;
            annotation
                .get(&annotation_progress)?
                .export(&annotation_storage, "data", false, &annotation_progress)?;
            data_annotations.push(DataAnnotationInfo {
                name: name.clone(),
                row_storage_folder: folder,
                true_data_type: annotation.data_type().id().to_string(),
            });
        }

        info.rows.push(RowInfo {
            index: row,
            true_data_type: item.data_type().id().to_string(),
            text_annotations: table.text_annotations(row)?,
            data_annotations,
        });
    }

    let json_path = dir.join(JSON_FILE);
    let json = serde_json::to_vec_pretty(&info)
        .map_err(|e| Error::io(&json_path, io::Error::other(e)))?;
    storage.write_file(JSON_FILE, json)?;

    let csv_path = dir.join(CSV_FILE);
    let file = std::fs::File::create(&csv_path).map_err(|e| Error::io(&csv_path, e))?;
    info.write_csv(file)
        .map_err(|e| Error::io(&csv_path, io::Error::other(e)))?;

    info!(
        operation = operations::SAVE,
        status = status::SUCCESS,
        rows = total,
        path = %dir.display(),
        "saved table"
    );
    Ok(())
}

fn remove_saved_table(dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() && is_row_folder(&name) {
            std::fs::remove_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        } else if path.is_file() && (name == JSON_FILE || name == CSV_FILE) {
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
    }
    Ok(())
}

/// `3` for main data, `_0` for a data annotation column
fn is_row_folder(name: &str) -> bool {
    let digits = name.strip_prefix('_').unwrap_or(name);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Read `data-table.json` without touching any payload
pub fn read_info(dir: &Path) -> Result<TableInfo> {
    let json_path = dir.join(JSON_FILE);
    let bytes = match std::fs::read(&json_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::malformed(&json_path, "table metadata not found"));
        }
        Err(e) => return Err(Error::io(&json_path, e)),
    };

    let info: TableInfo = serde_json::from_slice(&bytes)
        .map_err(|e| Error::malformed(&json_path, format!("invalid table metadata: {}", e)))?;

    if info.format_version > FORMAT_VERSION {
        return Err(Error::malformed(
            &json_path,
            format!(
                "format version {} is newer than the supported version {}",
                info.format_version, FORMAT_VERSION
            ),
        ));
    }
    for annotation in info.rows.iter().flat_map(|r| &r.data_annotations) {
        if !is_relative_folder(&annotation.row_storage_folder) {
            return Err(Error::malformed(
                &json_path,
                format!("invalid row storage folder '{}'", annotation.row_storage_folder),
            ));
        }
    }

    Ok(info)
}

/// Load a table saved with [`save`]
///
/// Nothing is returned on failure; items read so far are released with the
/// partial table.
pub fn load(cache: &Arc<DataCache>, dir: &Path, progress: &Progress) -> Result<AnnotatedTable> {
    let info = read_info(dir)?;
    let json_path = dir.join(JSON_FILE);
    let lookup = |id: &str| -> Result<DataType> {
        cache
            .registry()
            .get_by_id(id)
            .ok_or_else(|| Error::malformed(&json_path, format!("unknown data type '{}'", id)))
    };

    let accepted_type = lookup(&info.accepted_type_id)?;
    let storage = ReadStorage::new(dir)?;
    let progress = progress.resolve("Load table");
    let total = info.row_count();

    let mut table = AnnotatedTable::new(Arc::clone(cache), accepted_type);
    for (position, row) in info.rows.iter().enumerate() {
        let row_progress = progress.resolve_and_log("Row", position, total);
        let payload = lookup(&row.true_data_type)?.import(
            &storage.resolve(row.index.to_string()),
            cache,
            &row_progress,
        )?;

        let mut data_annotations = Vec::with_capacity(row.data_annotations.len());
        for annotation in &row.data_annotations {
            let annotation_progress =
                row_progress.resolve(format!("Data annotation '{}'", annotation.name));
            let value = lookup(&annotation.true_data_type)?.import(
                &storage.resolve(&annotation.row_storage_folder),
                cache,
                &annotation_progress,
            )?;
            data_annotations.push(DataAnnotation::new(
                annotation.name.clone(),
                VirtualItem::wrap(value),
            ));
        }

        table.add_row_with_data(
            payload,
            &row.text_annotations,
            TextMergeMode::OverwriteExisting,
            &data_annotations,
            DataMergeMode::OverwriteExisting,
            &row_progress,
        )?;
    }

    info!(
        operation = operations::IMPORT,
        status = status::SUCCESS,
        rows = total,
        path = %dir.display(),
        "loaded table"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BlobData, Data, TextData};
    use tempfile::TempDir;

    fn sample_table(cache: &Arc<DataCache>) -> AnnotatedTable {
        let progress = Progress::new();
        let mut table = AnnotatedTable::new(Arc::clone(cache), DataType::any());
        let first: Arc<dyn Data> = Arc::new(TextData::new("first"));
        let second: Arc<dyn Data> = Arc::new(BlobData::new(b"second".to_vec()));

        table
            .add_row_with_data(
                first,
                &[TextAnnotation::new("sample", "s1"), TextAnnotation::new("channel", "red")],
                TextMergeMode::Merge,
                &[DataAnnotation::new("mask", VirtualItem::new(BlobData::new(b"m".to_vec())))],
                DataMergeMode::Merge,
                &progress,
            )
            .unwrap();
        table
            .add_row(second, &[TextAnnotation::new("sample", "s2")], TextMergeMode::Merge, &progress)
            .unwrap();
        table
    }

    #[test]
    fn test_save_layout() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        let table = sample_table(&cache);

        save(&table, temp.path(), &Progress::new()).unwrap();

        assert!(temp.path().join(JSON_FILE).exists());
        assert!(temp.path().join("0").join("data.txt").exists());
        assert!(temp.path().join("1").join("data.bin").exists());
        assert!(temp.path().join("_0").join("0").join("data.bin").exists());
        assert!(!temp.path().join("_0").join("1").exists());

        let csv = std::fs::read_to_string(temp.path().join(CSV_FILE)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("index,true-data-type,$mask,sample,channel"));
        assert_eq!(lines.next(), Some("0,text,_0/0 [blob],s1,red"));
        assert_eq!(lines.next(), Some("1,blob,,s2,"));
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        let table = sample_table(&cache);
        let progress = Progress::new();

        save(&table, temp.path(), &progress).unwrap();
        let loaded = load(&cache, temp.path(), &progress).unwrap();

        assert_eq!(loaded.row_count(), table.row_count());
        assert_eq!(loaded.accepted_type(), table.accepted_type());
        for row in 0..table.row_count() {
            assert_eq!(loaded.data_type_of(row).unwrap(), table.data_type_of(row).unwrap());
            assert_eq!(
                loaded.text_annotations(row).unwrap(),
                table.text_annotations(row).unwrap()
            );
        }
        let mask = loaded.data_annotation_item(0, "mask").unwrap().unwrap();
        assert_eq!(mask.data_type(), BlobData::data_type());
        assert_eq!(loaded.get_as::<TextData>(0, &progress).unwrap().text(), "first");
    }

    #[test]
    fn test_missing_metadata_is_malformed() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        let err = load(&cache, temp.path(), &Progress::new()).unwrap_err();
        assert!(matches!(err, Error::MalformedStorage { .. }));
    }

    #[test]
    fn test_unparsable_metadata_is_malformed() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(JSON_FILE), "{ not json").unwrap();
        let err = read_info(temp.path()).unwrap_err();
        assert!(matches!(err, Error::MalformedStorage { .. }));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        save(&sample_table(&cache), temp.path(), &Progress::new()).unwrap();

        let mut info = read_info(temp.path()).unwrap();
        info.rows[1].true_data_type = "image".to_string();
        std::fs::write(
            temp.path().join(JSON_FILE),
            serde_json::to_vec(&info).unwrap(),
        )
        .unwrap();

        let err = load(&cache, temp.path(), &Progress::new()).unwrap_err();
        assert!(matches!(err, Error::MalformedStorage { .. }));
    }

    #[test]
    fn test_escaping_folder_is_malformed() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        save(&sample_table(&cache), temp.path(), &Progress::new()).unwrap();

        let mut info = read_info(temp.path()).unwrap();
        info.rows[0].data_annotations[0].row_storage_folder = "../elsewhere".to_string();
        std::fs::write(
            temp.path().join(JSON_FILE),
            serde_json::to_vec(&info).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            read_info(temp.path()),
            Err(Error::MalformedStorage { .. })
        ));
    }

    #[test]
    fn test_save_over_previous_table() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        save(&sample_table(&cache), temp.path(), &progress).unwrap();
        std::fs::write(temp.path().join("0").join("a.txt"), "stale").unwrap();
        std::fs::write(temp.path().join("notes.md"), "kept").unwrap();

        let mut smaller = AnnotatedTable::new(Arc::clone(&cache), DataType::any());
        let text: Arc<dyn Data> = Arc::new(TextData::new("fresh"));
        smaller.add_row(text, &[], TextMergeMode::Merge, &progress).unwrap();
        save(&smaller, temp.path(), &progress).unwrap();

        assert!(!temp.path().join("1").exists());
        assert!(!temp.path().join("_0").exists());
        assert!(!temp.path().join("0").join("a.txt").exists());
        assert!(temp.path().join("notes.md").exists());

        let loaded = load(&cache, temp.path(), &progress).unwrap();
        assert_eq!(loaded.row_count(), 1);
        assert_eq!(loaded.item(0).unwrap().display_string(), "fresh");
        assert!(loaded.data_columns().is_empty());
    }

    #[test]
    fn test_is_row_folder() {
        assert!(is_row_folder("0"));
        assert!(is_row_folder("12"));
        assert!(is_row_folder("_3"));
        assert!(!is_row_folder("_"));
        assert!(!is_row_folder("notes"));
        assert!(!is_row_folder("__1"));
    }

    #[test]
    fn test_save_destroyed_table_fails() {
        let temp = TempDir::new().unwrap();
        let cache = DataCache::temporary().unwrap();
        let mut table = sample_table(&cache);
        table.destroy().unwrap();

        let err = save(&table, temp.path(), &Progress::new()).unwrap_err();
        assert!(matches!(err, Error::DataDestroyed { row: 0 }));
    }

    #[test]
    fn test_format_version_defaults() {
        let info: TableInfo =
            serde_json::from_str(r#"{"accepted-type-id": "data", "rows": []}"#).unwrap();
        assert_eq!(info.format_version, FORMAT_VERSION);
    }
}
