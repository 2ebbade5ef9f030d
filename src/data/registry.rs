use super::{BlobData, Data, DataType, MergedAnnotations, TextData};
use crate::error::{Error, Result};
use crate::progress::Progress;
use std::collections::HashMap;
use std::sync::Arc;

/// Converts a payload into another type
pub type ConvertFn = fn(Arc<dyn Data>, &Progress) -> Result<Arc<dyn Data>>;

/// Known data types and the conversions between them
///
/// Built once and then shared read-only through a `DataCache`.
#[derive(Clone)]
pub struct TypeRegistry {
    types: HashMap<String, DataType>,
    converters: HashMap<(String, String), ConvertFn>,
}

impl TypeRegistry {
    /// Registry that only knows the root type
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
            converters: HashMap::new(),
        };
        registry.register_type(DataType::any());
        registry
    }

    /// Registry with the built-in payload types and the text -> blob conversion
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_type(BlobData::data_type());
        registry.register_type(TextData::data_type());
        registry.register_type(MergedAnnotations::data_type());
        registry.register_converter(
            &TextData::data_type(),
            &BlobData::data_type(),
            text_to_blob,
        );
        registry
    }

    pub fn register_type(&mut self, data_type: DataType) {
        self.types.insert(data_type.id().to_string(), data_type);
    }

    pub fn register_converter(&mut self, from: &DataType, to: &DataType, convert: ConvertFn) {
        self.converters
            .insert((from.id().to_string(), to.id().to_string()), convert);
    }

    pub fn get_by_id(&self, id: &str) -> Option<DataType> {
        self.types.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// Type ids in sorted order
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.types.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Conversion that needs no work: same type, or the root type as target
    pub fn is_trivially_convertible(from: &DataType, to: &DataType) -> bool {
        from == to || to.is_any()
    }

    pub fn is_convertible(&self, from: &DataType, to: &DataType) -> bool {
        Self::is_trivially_convertible(from, to)
            || self
                .converters
                .contains_key(&(from.id().to_string(), to.id().to_string()))
    }

    /// Convert `data` into `to`; trivial conversions return the payload unchanged
    pub fn convert(
        &self,
        data: Arc<dyn Data>,
        to: &DataType,
        progress: &Progress,
    ) -> Result<Arc<dyn Data>> {
        let from = data.data_type();
        if Self::is_trivially_convertible(&from, to) {
            return Ok(data);
        }

        match self
            .converters
            .get(&(from.id().to_string(), to.id().to_string()))
        {
            Some(convert) => {
                progress.log(format!("Converting {} to {}", from.id(), to.id()));
                convert(data, progress)
            }
            None => Err(Error::TypeMismatch {
                found: from.id().to_string(),
                expected: to.id().to_string(),
            }),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn text_to_blob(data: Arc<dyn Data>, _progress: &Progress) -> Result<Arc<dyn Data>> {
    let text = super::downcast::<TextData>(data).ok_or_else(|| Error::TypeMismatch {
        found: "unknown".to_string(),
        expected: super::text::TEXT_TYPE_ID.to_string(),
    })?;
    Ok(Arc::new(BlobData::new(text.text().as_bytes().to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.contains("data"));
        assert!(registry.contains("blob"));
        assert!(registry.contains("text"));
        assert!(registry.contains("merged-annotations"));
        assert!(registry.get_by_id("image").is_none());
    }

    #[test]
    fn test_convertibility() {
        let registry = TypeRegistry::with_builtins();
        let text = TextData::data_type();
        let blob = BlobData::data_type();

        assert!(registry.is_convertible(&text, &DataType::any()));
        assert!(registry.is_convertible(&text, &text));
        assert!(registry.is_convertible(&text, &blob));
        assert!(!registry.is_convertible(&blob, &text));
        assert!(!TypeRegistry::is_trivially_convertible(&text, &blob));
    }

    #[test]
    fn test_convert_text_to_blob() {
        let registry = TypeRegistry::with_builtins();
        let data: Arc<dyn Data> = Arc::new(TextData::new("abc"));
        let converted = registry
            .convert(data, &BlobData::data_type(), &Progress::new())
            .ok()
            .unwrap();
        let blob = super::super::downcast::<BlobData>(converted).unwrap();
        assert_eq!(blob.bytes(), b"abc");
    }

    #[test]
    fn test_convert_without_converter_fails() {
        let registry = TypeRegistry::with_builtins();
        let data: Arc<dyn Data> = Arc::new(BlobData::new(vec![1, 2, 3]));
        let err = registry
            .convert(data, &TextData::data_type(), &Progress::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
