// Common test utilities shared across integration tests
//
// ## Test Isolation Strategy
//
// Every test gets its own temporary workspace:
// - Spill area: a unique temp directory, passed to the binary through
//   SPILLWAY_CONFIG_CACHE_DIR
// - Tables: saved under the workspace root
//
// Dropping the workspace deletes both, so tests can run in parallel.

#![allow(dead_code)]

use assert_cmd::Command;
use spillway::data::{BlobData, Data, TextData};
use spillway::{
    AnnotatedTable, CacheOptions, DataAnnotation, DataCache, DataMergeMode, DataType, Progress,
    TextAnnotation, TextMergeMode, TypeRegistry, VirtualItem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestWorkspace {
    temp_dir: TempDir,
    cache_dir: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("spill");
        Self {
            temp_dir,
            cache_dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_dir
    }

    /// Data cache over this workspace's spill area
    pub fn cache(&self) -> Arc<DataCache> {
        let options = CacheOptions {
            dir: Some(self.cache_dir.clone()),
            ..Default::default()
        };
        DataCache::open(TypeRegistry::with_builtins(), &options).unwrap()
    }

    /// The spillway binary, isolated to this workspace
    pub fn spillway(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_spillway"));
        cmd.current_dir(self.path())
            .env("SPILLWAY_CONFIG_CACHE_DIR", &self.cache_dir)
            .env("SPILLWAY_LOG_FORMAT", "compact")
            .env_remove("SPILLWAY_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Save [`sample_table`] under `name` and return its directory
    pub fn save_sample_table(&self, name: &str) -> PathBuf {
        let cache = self.cache();
        let table = sample_table(&cache);
        let dir = self.path().join(name);
        spillway::table::save(&table, &dir, &Progress::new()).unwrap();
        dir
    }
}

pub fn text(value: &str) -> Arc<dyn Data> {
    Arc::new(TextData::new(value))
}

pub fn blob(bytes: &[u8]) -> Arc<dyn Data> {
    Arc::new(BlobData::new(bytes.to_vec()))
}

/// Three rows of mixed types
///
/// - row 0: text "alpha", `sample=s1`, `channel=red`, data annotation `mask`
/// - row 1: blob "beta", `sample=s2`
/// - row 2: text "gamma", `sample=s3`, `channel=blue`
pub fn sample_table(cache: &Arc<DataCache>) -> AnnotatedTable {
    let progress = Progress::new();
    let mut table = AnnotatedTable::new(Arc::clone(cache), DataType::any());

    table
        .add_row_with_data(
            text("alpha"),
            &[
                TextAnnotation::new("sample", "s1"),
                TextAnnotation::new("channel", "red"),
            ],
            TextMergeMode::Merge,
            &[DataAnnotation::new(
                "mask",
                VirtualItem::new(BlobData::new(b"mask-0".to_vec())),
            )],
            DataMergeMode::Merge,
            &progress,
        )
        .unwrap();
    table
        .add_row(
            blob(b"beta"),
            &[TextAnnotation::new("sample", "s2")],
            TextMergeMode::Merge,
            &progress,
        )
        .unwrap();
    table
        .add_row(
            text("gamma"),
            &[
                TextAnnotation::new("sample", "s3"),
                TextAnnotation::new("channel", "blue"),
            ],
            TextMergeMode::Merge,
            &progress,
        )
        .unwrap();

    table
}

/// Text of `row`, which must hold a [`TextData`]
pub fn row_text(table: &AnnotatedTable, row: usize) -> String {
    table
        .get_as::<TextData>(row, &Progress::new())
        .unwrap()
        .text()
        .to_string()
}
