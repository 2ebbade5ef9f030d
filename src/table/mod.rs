//! Annotated data table
//!
//! An [`AnnotatedTable`] is an ordered list of rows. Each row has one main
//! [`VirtualItem`] plus named text and data annotations. Annotations are kept
//! column-wise: every registered column stores one slot per row, `None`
//! meaning "no value in this row".
//!
//! Items are shared, not copied. Adding a row that already lives in another
//! table (or slicing a table) hands out the same item, and the table
//! registers itself as one of its users. Dropping or destroying a table
//! closes only the items nobody else uses.

pub mod persistence;

pub use persistence::{load, read_info, save, TableInfo};

use crate::annotation::{DataAnnotation, DataMergeMode, TextAnnotation, TextMergeMode};
use crate::cache::DataCache;
use crate::data::{downcast, Data, DataType, TypeRegistry};
use crate::error::{Error, Result};
use crate::item::{HolderId, VirtualItem};
use crate::logging::{operations, status};
use crate::progress::Progress;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Main data of a new row: a bare payload or an existing item
pub enum RowData {
    Payload(Arc<dyn Data>),
    Item(VirtualItem),
}

impl From<Arc<dyn Data>> for RowData {
    fn from(payload: Arc<dyn Data>) -> Self {
        RowData::Payload(payload)
    }
}

impl From<VirtualItem> for RowData {
    fn from(item: VirtualItem) -> Self {
        RowData::Item(item)
    }
}

/// Snapshot of one row
#[derive(Debug, Clone)]
pub struct Row {
    pub index: usize,
    /// `None` once the table was destroyed
    pub item: Option<VirtualItem>,
    pub text_annotations: Vec<TextAnnotation>,
    pub data_annotations: Vec<DataAnnotation>,
}

impl Row {
    pub fn text_annotation(&self, name: &str) -> Option<&str> {
        self.text_annotations
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

pub struct AnnotatedTable {
    cache: Arc<DataCache>,
    holder: HolderId,
    accepted_type: DataType,
    items: Vec<Option<VirtualItem>>,
    text_columns: Vec<String>,
    text_arrays: HashMap<String, Vec<Option<String>>>,
    data_columns: Vec<String>,
    data_arrays: HashMap<String, Vec<Option<VirtualItem>>>,
}

impl AnnotatedTable {
    pub fn new(cache: Arc<DataCache>, accepted_type: DataType) -> Self {
        Self {
            cache,
            holder: HolderId::next(),
            accepted_type,
            items: Vec::new(),
            text_columns: Vec::new(),
            text_arrays: HashMap::new(),
            data_columns: Vec::new(),
            data_arrays: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    pub fn accepted_type(&self) -> &DataType {
        &self.accepted_type
    }

    pub fn holder(&self) -> HolderId {
        self.holder
    }

    pub fn row_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Text annotation columns in creation order
    pub fn text_columns(&self) -> &[String] {
        &self.text_columns
    }

    /// Data annotation columns in creation order
    pub fn data_columns(&self) -> &[String] {
        &self.data_columns
    }

    pub fn text_column(&self, name: &str) -> Option<&[Option<String>]> {
        self.text_arrays.get(name).map(Vec::as_slice)
    }

    pub fn data_column(&self, name: &str) -> Option<&[Option<VirtualItem>]> {
        self.data_arrays.get(name).map(Vec::as_slice)
    }

    /// Append a row with text annotations only
    pub fn add_row(
        &mut self,
        data: impl Into<RowData>,
        text_annotations: &[TextAnnotation],
        text_merge_mode: TextMergeMode,
        progress: &Progress,
    ) -> Result<usize> {
        self.add_row_with_data(
            data,
            text_annotations,
            text_merge_mode,
            &[],
            DataMergeMode::default(),
            progress,
        )
    }

    /// Append a row; returns its index
    ///
    /// The main data must be convertible to the accepted type. Annotations
    /// are collapsed to one value per name with the given modes first;
    /// existing rows are never touched.
    pub fn add_row_with_data(
        &mut self,
        data: impl Into<RowData>,
        text_annotations: &[TextAnnotation],
        text_merge_mode: TextMergeMode,
        data_annotations: &[DataAnnotation],
        data_merge_mode: DataMergeMode,
        progress: &Progress,
    ) -> Result<usize> {
        let item = self.accept(data.into(), progress)?;
        let text_annotations = text_merge_mode.merge(text_annotations);
        let data_annotations = data_merge_mode.merge(data_annotations, progress);

        let row = self.items.len();
        item.add_user(self.holder);
        self.items.push(Some(item));
        for array in self.text_arrays.values_mut() {
            array.push(None);
        }
        for array in self.data_arrays.values_mut() {
            array.push(None);
        }

        for annotation in text_annotations {
            self.text_array_mut(&annotation.name)[row] = Some(annotation.value);
        }
        for annotation in data_annotations {
            annotation.item.add_user(self.holder);
            self.data_array_mut(&annotation.name)[row] = Some(annotation.item);
        }

        Ok(row)
    }

    /// Append every row of `other`, sharing its items
    ///
    /// Annotations are taken over as they are; a row of `other` that was
    /// destroyed fails the whole call before anything is added.
    pub fn add_rows_from_table(&mut self, other: &AnnotatedTable, progress: &Progress) -> Result<()> {
        if let Some(row) = other.items.iter().position(Option::is_none) {
            return Err(Error::DataDestroyed { row });
        }

        let total = other.row_count();
        for row in 0..total {
            let row_progress = progress.resolve_and_log("Row", row, total);
            let item = other.item(row)?;
            self.add_row_with_data(
                item,
                &other.text_annotations(row)?,
                TextMergeMode::OverwriteExisting,
                &other.data_annotations(row)?,
                DataMergeMode::OverwriteExisting,
                &row_progress,
            )?;
        }
        Ok(())
    }

    /// New table with exactly the given rows, in the given order
    ///
    /// Items are shared with this table. All columns are kept.
    pub fn slice(&self, rows: &[usize]) -> Result<AnnotatedTable> {
        for &row in rows {
            self.check_row(row)?;
        }

        let mut sliced = AnnotatedTable::new(Arc::clone(&self.cache), self.accepted_type.clone());
        for &row in rows {
            let item = self.items[row].clone();
            if let Some(item) = &item {
                item.add_user(sliced.holder);
            }
            sliced.items.push(item);
        }

        for name in &self.text_columns {
            let array = &self.text_arrays[name];
            sliced.text_columns.push(name.clone());
            sliced
                .text_arrays
                .insert(name.clone(), rows.iter().map(|&row| array[row].clone()).collect());
        }
        for name in &self.data_columns {
            let array = &self.data_arrays[name];
            let values: Vec<Option<VirtualItem>> =
                rows.iter().map(|&row| array[row].clone()).collect();
            for item in values.iter().flatten() {
                item.add_user(sliced.holder);
            }
            sliced.data_columns.push(name.clone());
            sliced.data_arrays.insert(name.clone(), values);
        }

        Ok(sliced)
    }

    /// Rows matching `predicate`, as a new table sharing items
    pub fn filter<F>(&self, predicate: F) -> Result<AnnotatedTable>
    where
        F: Fn(&Row) -> bool,
    {
        let mut selected = Vec::new();
        for index in 0..self.row_count() {
            if predicate(&self.row(index)?) {
                selected.push(index);
            }
        }
        self.slice(&selected)
    }

    /// Main data of `row`, converted to `target_type`
    pub fn get(&self, row: usize, target_type: &DataType, progress: &Progress) -> Result<Arc<dyn Data>> {
        let payload = self.item(row)?.get(progress)?;
        self.cache.registry().convert(payload, target_type, progress)
    }

    /// Main data of every row, converted to `target_type`
    pub fn get_all_data(&self, target_type: &DataType, progress: &Progress) -> Result<Vec<Arc<dyn Data>>> {
        let total = self.row_count();
        (0..total)
            .map(|row| {
                let row_progress = progress.resolve_and_log("Get row", row, total);
                self.get(row, target_type, &row_progress)
            })
            .collect()
    }

    /// Main data of `row` as a concrete payload type
    pub fn get_as<T: Data>(&self, row: usize, progress: &Progress) -> Result<Arc<T>> {
        let payload = self.item(row)?.get(progress)?;
        let found = payload.data_type().id().to_string();
        downcast::<T>(payload).ok_or_else(|| Error::TypeMismatch {
            found,
            expected: std::any::type_name::<T>().to_string(),
        })
    }

    pub fn item(&self, row: usize) -> Result<VirtualItem> {
        self.check_row(row)?;
        self.items[row].clone().ok_or(Error::DataDestroyed { row })
    }

    /// Declared type of the main data of `row`
    pub fn data_type_of(&self, row: usize) -> Result<DataType> {
        Ok(self.item(row)?.data_type())
    }

    pub fn row(&self, row: usize) -> Result<Row> {
        self.check_row(row)?;
        Ok(Row {
            index: row,
            item: self.items[row].clone(),
            text_annotations: self.text_annotations(row)?,
            data_annotations: self.data_annotations(row)?,
        })
    }

    /// Text annotations of `row` in column order
    pub fn text_annotations(&self, row: usize) -> Result<Vec<TextAnnotation>> {
        self.check_row(row)?;
        Ok(self
            .text_columns
            .iter()
            .filter_map(|name| {
                self.text_arrays[name][row]
                    .as_ref()
                    .map(|value| TextAnnotation::new(name.clone(), value.clone()))
            })
            .collect())
    }

    /// Data annotations of `row` in column order
    pub fn data_annotations(&self, row: usize) -> Result<Vec<DataAnnotation>> {
        self.check_row(row)?;
        Ok(self
            .data_columns
            .iter()
            .filter_map(|name| {
                self.data_arrays[name][row]
                    .as_ref()
                    .map(|item| DataAnnotation::new(name.clone(), item.clone()))
            })
            .collect())
    }

    pub fn text_annotation(&self, row: usize, name: &str) -> Result<Option<&str>> {
        self.check_row(row)?;
        Ok(self
            .text_arrays
            .get(name)
            .and_then(|array| array[row].as_deref()))
    }

    pub fn data_annotation_item(&self, row: usize, name: &str) -> Result<Option<VirtualItem>> {
        self.check_row(row)?;
        Ok(self
            .data_arrays
            .get(name)
            .and_then(|array| array[row].clone()))
    }

    /// Replace the main data of `row`, releasing the item it replaces
    ///
    /// The new data goes through the same type check as `add_row`.
    pub fn set_data(&mut self, row: usize, data: impl Into<RowData>, progress: &Progress) -> Result<()> {
        self.check_row(row)?;
        let item = self.accept(data.into(), progress)?;
        item.add_user(self.holder);
        let previous = self.items[row].replace(item);
        match previous {
            Some(previous) => self.release_item(&previous),
            None => Ok(()),
        }
    }

    /// Set one text annotation, creating the column if needed
    pub fn set_text_annotation(&mut self, row: usize, name: &str, value: impl Into<String>) -> Result<()> {
        self.check_row(row)?;
        self.text_array_mut(name)[row] = Some(value.into());
        Ok(())
    }

    /// Set one data annotation, releasing the value it replaces
    pub fn set_data_annotation(&mut self, row: usize, name: &str, item: VirtualItem) -> Result<()> {
        self.check_row(row)?;
        item.add_user(self.holder);
        let previous = self.data_array_mut(name)[row].replace(item);
        match previous {
            Some(previous) => self.release_item(&previous),
            None => Ok(()),
        }
    }

    /// Add a text annotation to every row
    ///
    /// Rows that already have a value keep it unless `overwrite` is set.
    pub fn add_text_annotation_to_all(&mut self, annotation: &TextAnnotation, overwrite: bool) {
        let value = annotation.value.clone();
        for slot in self.text_array_mut(&annotation.name).iter_mut() {
            if overwrite || slot.is_none() {
                *slot = Some(value.clone());
            }
        }
    }

    /// Remove a text column; returns whether it existed
    pub fn remove_text_column(&mut self, name: &str) -> bool {
        self.text_columns.retain(|column| column != name);
        self.text_arrays.remove(name).is_some()
    }

    /// Spill every main and data-annotation item
    pub fn spill_all(&self, progress: &Progress) -> Result<()> {
        let total = self.row_count();
        for row in 0..total {
            let row_progress = progress.resolve_and_log("Spill row", row, total);
            for item in self.row_items(row) {
                item.spill(&self.cache, &row_progress, false)?;
            }
        }
        Ok(())
    }

    /// Materialize every main and data-annotation item
    pub fn materialize_all(&self, progress: &Progress, delete_backing: bool) -> Result<()> {
        let total = self.row_count();
        for row in 0..total {
            let row_progress = progress.resolve_and_log("Materialize row", row, total);
            for item in self.row_items(row) {
                item.materialize(&row_progress, delete_backing)?;
            }
        }
        Ok(())
    }

    /// Drop every item reference, keeping text annotations and columns
    ///
    /// Items no other holder uses are closed. Returns the first error after
    /// visiting every item.
    pub fn destroy(&mut self) -> Result<()> {
        let mut first_error = None;

        let mut released: Vec<VirtualItem> = self.items.iter_mut().filter_map(Option::take).collect();
        for array in self.data_arrays.values_mut() {
            released.extend(array.iter_mut().filter_map(Option::take));
        }

        for item in &released {
            if let Err(e) = self.release_item(item) {
                first_error.get_or_insert(e);
            }
        }

        debug!(
            operation = operations::DESTROY,
            items = released.len(),
            rows = self.row_count(),
            "destroyed table data"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove every row and column
    ///
    /// With `force`, items are closed even if other holders still use them.
    pub fn clear(&mut self, force: bool) -> Result<()> {
        let mut first_error = None;

        let mut released: Vec<VirtualItem> = self.items.drain(..).flatten().collect();
        for (_, array) in self.data_arrays.drain() {
            released.extend(array.into_iter().flatten());
        }
        self.text_arrays.clear();
        self.text_columns.clear();
        self.data_columns.clear();

        for item in &released {
            let result = if force {
                item.remove_user(self.holder);
                item.close()
            } else {
                self.release_item(item)
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Deep copy: every item is duplicated, annotations are copied
    pub fn duplicate(&self, progress: &Progress) -> Result<AnnotatedTable> {
        let mut copy = AnnotatedTable::new(Arc::clone(&self.cache), self.accepted_type.clone());
        let total = self.row_count();

        let mut duplicates: HashMap<usize, Vec<Option<VirtualItem>>> = HashMap::new();
        for (column, name) in self.data_columns.iter().enumerate() {
            let values = self.data_arrays[name]
                .iter()
                .map(|slot| slot.as_ref().map(|item| item.duplicate(progress)).transpose())
                .collect::<Result<Vec<_>>>()?;
            duplicates.insert(column, values);
        }

        for row in 0..total {
            let row_progress = progress.resolve_and_log("Duplicate row", row, total);
            let item = match &self.items[row] {
                Some(item) => Some(item.duplicate(&row_progress)?),
                None => None,
            };
            if let Some(item) = &item {
                item.add_user(copy.holder);
            }
            copy.items.push(item);
        }

        for name in &self.text_columns {
            copy.text_columns.push(name.clone());
            copy.text_arrays
                .insert(name.clone(), self.text_arrays[name].clone());
        }
        for (column, name) in self.data_columns.iter().enumerate() {
            let values = duplicates.remove(&column).unwrap_or_default();
            for item in values.iter().flatten() {
                item.add_user(copy.holder);
            }
            copy.data_columns.push(name.clone());
            copy.data_arrays.insert(name.clone(), values);
        }

        Ok(copy)
    }

    /// Convert every row to `target_type` in place and accept only that type
    ///
    /// Fails with `TypeMismatch` before changing anything if a row cannot be
    /// converted. Every row is replaced before the first error releasing an
    /// old item is returned.
    pub fn convert(&mut self, target_type: &DataType, progress: &Progress) -> Result<()> {
        let registry = self.cache.registry();
        for (row, slot) in self.items.iter().enumerate() {
            let item = slot.as_ref().ok_or(Error::DataDestroyed { row })?;
            if !registry.is_convertible(&item.data_type(), target_type) {
                return Err(Error::TypeMismatch {
                    found: item.data_type().id().to_string(),
                    expected: target_type.id().to_string(),
                });
            }
        }

        let total = self.row_count();
        let mut converted = Vec::new();
        for row in 0..total {
            let row_progress = progress.resolve_and_log("Convert row", row, total);
            let item = self.item(row)?;
            if TypeRegistry::is_trivially_convertible(&item.data_type(), target_type) {
                continue;
            }
            let payload = registry.convert(item.get(&row_progress)?, target_type, &row_progress)?;
            converted.push((row, VirtualItem::wrap(payload)));
        }

        let mut first_error = None;
        for (row, item) in converted {
            item.add_user(self.holder);
            if let Some(previous) = self.items[row].replace(item) {
                if let Err(e) = self.release_item(&previous) {
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(
            operation = operations::CONVERT,
            status = status::SUCCESS,
            from = self.accepted_type.id(),
            to = target_type.id(),
            rows = total,
            "converted table"
        );
        self.accepted_type = target_type.clone();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn accept(&self, data: RowData, progress: &Progress) -> Result<VirtualItem> {
        let found = match &data {
            RowData::Item(item) if item.is_closed() => {
                return Err(Error::UseAfterFree {
                    display: item.display_string(),
                });
            }
            RowData::Item(item) => item.data_type(),
            RowData::Payload(payload) => payload.data_type(),
        };

        if TypeRegistry::is_trivially_convertible(&found, &self.accepted_type) {
            return Ok(match data {
                RowData::Item(item) => item,
                RowData::Payload(payload) => VirtualItem::wrap(payload),
            });
        }

        let registry = self.cache.registry();
        if !registry.is_convertible(&found, &self.accepted_type) {
            return Err(self.mismatch(&found));
        }
        let payload = match data {
            RowData::Item(item) => item.get(progress)?,
            RowData::Payload(payload) => payload,
        };
        let converted = registry.convert(payload, &self.accepted_type, progress)?;
        Ok(VirtualItem::wrap(converted))
    }

    fn mismatch(&self, found: &DataType) -> Error {
        Error::TypeMismatch {
            found: found.id().to_string(),
            expected: self.accepted_type.id().to_string(),
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row < self.items.len() {
            Ok(())
        } else {
            Err(Error::RowOutOfBounds {
                row,
                row_count: self.items.len(),
            })
        }
    }

    /// Main item and data-annotation items of one row
    fn row_items(&self, row: usize) -> Vec<&VirtualItem> {
        let mut items: Vec<&VirtualItem> = self.items[row].iter().collect();
        for name in &self.data_columns {
            if let Some(item) = &self.data_arrays[name][row] {
                items.push(item);
            }
        }
        items
    }

    fn text_array_mut(&mut self, name: &str) -> &mut Vec<Option<String>> {
        if !self.text_arrays.contains_key(name) {
            self.text_columns.push(name.to_string());
        }
        let row_count = self.items.len();
        self.text_arrays
            .entry(name.to_string())
            .or_insert_with(|| vec![None; row_count])
    }

    fn data_array_mut(&mut self, name: &str) -> &mut Vec<Option<VirtualItem>> {
        if !self.data_arrays.contains_key(name) {
            self.data_columns.push(name.to_string());
        }
        let row_count = self.items.len();
        self.data_arrays
            .entry(name.to_string())
            .or_insert_with(|| vec![None; row_count])
    }

    fn release_item(&self, item: &VirtualItem) -> Result<()> {
        item.release(self.holder).map(|_| ())
    }
}

impl fmt::Display for AnnotatedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows of {}", self.row_count(), self.accepted_type.name())
    }
}

impl fmt::Debug for AnnotatedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotatedTable")
            .field("accepted_type", &self.accepted_type)
            .field("rows", &self.row_count())
            .field("text_columns", &self.text_columns)
            .field("data_columns", &self.data_columns)
            .finish()
    }
}

impl Drop for AnnotatedTable {
    fn drop(&mut self) {
        let items = self.items.iter().flatten();
        let annotations = self.data_arrays.values().flatten().flatten();
        for item in items.chain(annotations) {
            if let Err(e) = item.release(self.holder) {
                warn!(
                    operation = operations::CLOSE,
                    status = status::ERROR,
                    "failed to close item of dropped table: {}",
                    e
                );
            }
        }
    }
}
