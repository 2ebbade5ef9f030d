use super::{Data, DataType};
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::storage::{make_filesystem_compatible, ReadStorage, WriteStorage};
use std::any::Any;
use std::sync::{Arc, LazyLock};

pub const TEXT_TYPE_ID: &str = "text";

static TEXT_TYPE: LazyLock<DataType> =
    LazyLock::new(|| DataType::new(TEXT_TYPE_ID, "Text", TextData::import));

const DISPLAY_LIMIT: usize = 64;

/// UTF-8 text, stored as a single `<name>.txt` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextData {
    text: String,
}

impl TextData {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn data_type() -> DataType {
        TEXT_TYPE.clone()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn import(storage: &ReadStorage, _cache: &DataCache, _progress: &Progress) -> Result<Arc<dyn Data>> {
        let file = storage.find_file("txt")?.ok_or_else(|| Error::Codec {
            type_id: TEXT_TYPE_ID.to_string(),
            reason: format!("no .txt file in {}", storage.path().display()),
        })?;
        let bytes = storage.read_file(&file)?;
        let text = String::from_utf8(bytes).map_err(|e| Error::Codec {
            type_id: TEXT_TYPE_ID.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(Self::new(text)))
    }
}

impl Data for TextData {
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
        storage.write_file(&format!("{}.txt", stem), self.text.as_bytes())?;
        Ok(())
    }

    fn duplicate(&self, _progress: &Progress) -> Result<Arc<dyn Data>> {
        Ok(Arc::new(self.clone()))
    }

    fn display_string(&self) -> String {
        if self.text.chars().count() > DISPLAY_LIMIT {
            let head: String = self.text.chars().take(DISPLAY_LIMIT).collect();
            format!("{}...", head)
        } else {
            self.text.clone()
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_string_truncates() {
        let long = "x".repeat(100);
        let text = TextData::new(long);
        assert_eq!(text.display_string().len(), DISPLAY_LIMIT + 3);
        assert_eq!(TextData::new("short").display_string(), "short");
    }
}
