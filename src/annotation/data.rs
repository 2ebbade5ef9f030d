use super::group_by_name;
use crate::data::{downcast, MergedAnnotations};
use crate::item::{HolderId, VirtualItem};
use crate::logging::operations;
use crate::progress::Progress;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// A named data value attached to a table row
#[derive(Debug, Clone)]
pub struct DataAnnotation {
    pub name: String,
    pub item: VirtualItem,
}

impl DataAnnotation {
    pub fn new(name: impl Into<String>, item: VirtualItem) -> Self {
        Self {
            name: name.into(),
            item,
        }
    }
}

/// How data values sharing a name are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataMergeMode {
    /// Keep every distinct value inside one [`MergedAnnotations`] value
    Merge,
    /// Like `Merge`, after unpacking values that are already merged
    MergeTables,
    /// First value wins
    SkipExisting,
    /// Last value wins
    #[default]
    OverwriteExisting,
}

impl DataMergeMode {
    /// Collapse a batch to one annotation per name
    ///
    /// The input stays owned by the caller. Merged values produced by
    /// `MergeTables` share items with the input, so the caller must register
    /// the result before dropping the input.
    pub fn merge(self, annotations: &[DataAnnotation], progress: &Progress) -> Vec<DataAnnotation> {
        match self {
            DataMergeMode::OverwriteExisting => pick_one(annotations, true),
            DataMergeMode::SkipExisting => pick_one(annotations, false),
            DataMergeMode::Merge => merge_groups(annotations),
            DataMergeMode::MergeTables => {
                let guard = HolderId::next();
                let flat = flatten(annotations, guard, progress);
                let merged = merge_groups(&flat);
                for annotation in &flat {
                    annotation.item.remove_user(guard);
                }
                merged
            }
        }
    }
}

impl fmt::Display for DataMergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataMergeMode::Merge => "merge",
            DataMergeMode::MergeTables => "merge-tables",
            DataMergeMode::SkipExisting => "skip-existing",
            DataMergeMode::OverwriteExisting => "overwrite-existing",
        };
        f.write_str(name)
    }
}

fn pick_one(annotations: &[DataAnnotation], last_wins: bool) -> Vec<DataAnnotation> {
    group_by_name(annotations, |a| a.name.as_str())
        .into_iter()
        .filter_map(|(_, members)| {
            let chosen = if last_wins {
                members.last()
            } else {
                members.first()
            };
            chosen.map(|a| (*a).clone())
        })
        .collect()
}

fn merge_groups(annotations: &[DataAnnotation]) -> Vec<DataAnnotation> {
    group_by_name(annotations, |a| a.name.as_str())
        .into_iter()
        .map(|(name, members)| {
            let mut distinct: Vec<VirtualItem> = Vec::new();
            for member in members {
                if !distinct.iter().any(|item| item.same_item(&member.item)) {
                    distinct.push(member.item.clone());
                }
            }

            if distinct.len() == 1 {
                DataAnnotation::new(name, distinct.remove(0))
            } else {
                DataAnnotation::new(name, VirtualItem::new(MergedAnnotations::new(distinct)))
            }
        })
        .collect()
}

/// Replace merged values by their rows, one level deep
///
/// Unpacked rows are registered under `guard`. A spilled merged value is
/// loaded as a fresh copy, and dropping that copy releases its rows.
fn flatten(
    annotations: &[DataAnnotation],
    guard: HolderId,
    progress: &Progress,
) -> Vec<DataAnnotation> {
    let mut flat = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        if annotation.item.data_type() != MergedAnnotations::data_type() {
            flat.push(annotation.clone());
            continue;
        }

        let nested = annotation
            .item
            .get(&progress.resolve(format!("Unpack '{}'", annotation.name)))
            .map(downcast::<MergedAnnotations>);
        match nested {
            Ok(Some(merged)) => {
                for row in merged.rows() {
                    row.add_user(guard);
                    flat.push(DataAnnotation::new(annotation.name.clone(), row.clone()));
                }
            }
            Ok(None) => flat.push(annotation.clone()),
            Err(e) => {
                warn!(
                    operation = operations::MERGE,
                    annotation = %annotation.name,
                    "keeping merged annotation as-is, it could not be read: {}",
                    e
                );
                flat.push(annotation.clone());
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataCache;
    use crate::data::TextData;

    fn text_item(value: &str) -> VirtualItem {
        VirtualItem::new(TextData::new(value))
    }

    fn unpack(annotation: &DataAnnotation) -> Vec<String> {
        let payload = annotation.item.get(&Progress::new()).ok().unwrap();
        downcast::<MergedAnnotations>(payload)
            .unwrap()
            .rows()
            .iter()
            .map(|row| row.display_string())
            .collect()
    }

    #[test]
    fn test_overwrite_and_skip() {
        let first = text_item("first");
        let second = text_item("second");
        let input = vec![
            DataAnnotation::new("mask", first.clone()),
            DataAnnotation::new("roi", text_item("roi")),
            DataAnnotation::new("mask", second.clone()),
        ];

        let overwritten = DataMergeMode::OverwriteExisting.merge(&input, &Progress::new());
        assert_eq!(overwritten.len(), 2);
        assert_eq!(overwritten[0].name, "mask");
        assert!(overwritten[0].item.same_item(&second));

        let skipped = DataMergeMode::SkipExisting.merge(&input, &Progress::new());
        assert!(skipped[0].item.same_item(&first));
        assert_eq!(skipped[1].name, "roi");
    }

    #[test]
    fn test_merge_keeps_singletons_and_dedups_identity() {
        let shared = text_item("same");
        let input = vec![
            DataAnnotation::new("mask", shared.clone()),
            DataAnnotation::new("mask", shared.clone()),
        ];
        let merged = DataMergeMode::Merge.merge(&input, &Progress::new());
        assert_eq!(merged.len(), 1);
        assert!(merged[0].item.same_item(&shared));
    }

    #[test]
    fn test_merge_folds_distinct_values() {
        let input = vec![
            DataAnnotation::new("mask", text_item("a")),
            DataAnnotation::new("mask", text_item("b")),
        ];
        let merged = DataMergeMode::Merge.merge(&input, &Progress::new());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].item.data_type(), MergedAnnotations::data_type());
        assert_eq!(unpack(&merged[0]), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_tables_does_not_nest() {
        let progress = Progress::new();
        let first = DataMergeMode::Merge.merge(
            &[
                DataAnnotation::new("mask", text_item("a")),
                DataAnnotation::new("mask", text_item("b")),
            ],
            &progress,
        );
        let mut input = first.clone();
        input.push(DataAnnotation::new("mask", text_item("c")));

        let nested = DataMergeMode::Merge.merge(&input, &progress);
        assert_eq!(unpack(&nested[0]).len(), 2);

        let flat = DataMergeMode::MergeTables.merge(&input, &progress);
        drop(input);
        drop(first);
        assert_eq!(unpack(&flat[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_tables_keeps_unreadable_value() {
        let merged = DataMergeMode::Merge.merge(
            &[
                DataAnnotation::new("mask", text_item("a")),
                DataAnnotation::new("mask", text_item("b")),
            ],
            &Progress::new(),
        );
        merged[0].item.close().unwrap();

        let input = vec![merged[0].clone()];
        let result = DataMergeMode::MergeTables.merge(&input, &Progress::new());
        assert_eq!(result.len(), 1);
        assert!(result[0].item.same_item(&merged[0].item));
    }

    #[test]
    fn test_merge_tables_unpacks_spilled_value() {
        let progress = Progress::new();
        let cache = DataCache::temporary().unwrap();
        let merged = DataMergeMode::Merge.merge(
            &[
                DataAnnotation::new("mask", text_item("a")),
                DataAnnotation::new("mask", text_item("b")),
            ],
            &progress,
        );
        merged[0].item.spill(&cache, &progress, false).unwrap();
        assert!(merged[0].item.is_spilled());

        let input = vec![merged[0].clone(), DataAnnotation::new("mask", text_item("c"))];
        let flat = DataMergeMode::MergeTables.merge(&input, &progress);
        assert_eq!(unpack(&flat[0]), vec!["a", "b", "c"]);

        let payload = flat[0].item.get(&progress).unwrap();
        let rows = downcast::<MergedAnnotations>(payload).unwrap();
        for row in rows.rows() {
            assert!(!row.is_closed());
            assert!(row.get(&progress).is_ok());
        }
    }

    #[test]
    fn test_merge_tables_keeps_single_unpacked_row_open() {
        let progress = Progress::new();
        let cache = DataCache::temporary().unwrap();
        let single = VirtualItem::new(MergedAnnotations::new(vec![text_item("a")]));
        single.spill(&cache, &progress, false).unwrap();

        let input = vec![DataAnnotation::new("mask", single.clone())];
        let flat = DataMergeMode::MergeTables.merge(&input, &progress);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].item.data_type(), TextData::data_type());
        assert!(!flat[0].item.is_closed());
        assert_eq!(flat[0].item.display_string(), "a");
        assert!(flat[0].item.get(&progress).is_ok());
    }
}
