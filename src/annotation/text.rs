use super::group_by_name;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named string value attached to a table row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub name: String,
    pub value: String,
}

impl TextAnnotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for TextAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// How two text values sharing a name are combined
///
/// `Merge` and `MergeLists` work on the list encoding used throughout the
/// crate: `""` is the empty list, a string containing `[` and `]` that parses
/// as a JSON array of strings is that list, anything else is a one-element
/// list. Lists are written back as `""`, the bare element, or a JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextMergeMode {
    /// Keep the existing value unless it is empty
    SkipExisting,
    /// Always take the incoming value
    OverwriteExisting,
    /// Append the incoming value to the existing list
    #[default]
    Merge,
    /// Like `Merge`, but an incoming list is spliced in element by element
    MergeLists,
    /// Drop the annotation
    Discard,
}

impl TextMergeMode {
    /// Combine an existing value with an incoming one
    pub fn merge_values(self, existing: &str, incoming: &str) -> String {
        match self {
            TextMergeMode::SkipExisting => {
                if existing.is_empty() {
                    incoming.to_string()
                } else {
                    existing.to_string()
                }
            }
            TextMergeMode::OverwriteExisting => incoming.to_string(),
            TextMergeMode::Discard => String::new(),
            TextMergeMode::Merge | TextMergeMode::MergeLists => {
                let mut values = decode_list(existing);
                let candidates = match self {
                    TextMergeMode::MergeLists => {
                        let decoded = decode_list(incoming);
                        if decoded.len() > 1 {
                            decoded
                        } else {
                            vec![incoming.to_string()]
                        }
                    }
                    _ => vec![incoming.to_string()],
                };
                for candidate in candidates {
                    if !candidate.is_empty() && !values.contains(&candidate) {
                        values.push(candidate);
                    }
                }
                encode_list(values)
            }
        }
    }

    /// Collapse a batch to one annotation per name
    ///
    /// Names keep their order of first appearance; the values of each name
    /// are folded with [`merge_values`](Self::merge_values) starting from `""`.
    /// `Discard` yields no annotations.
    pub fn merge(self, annotations: &[TextAnnotation]) -> Vec<TextAnnotation> {
        if self == TextMergeMode::Discard {
            return Vec::new();
        }

        group_by_name(annotations, |a| a.name.as_str())
            .into_iter()
            .map(|(name, members)| {
                let value = members
                    .iter()
                    .fold(String::new(), |acc, a| self.merge_values(&acc, &a.value));
                TextAnnotation::new(name, value)
            })
            .collect()
    }
}

impl fmt::Display for TextMergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextMergeMode::SkipExisting => "skip-existing",
            TextMergeMode::OverwriteExisting => "overwrite-existing",
            TextMergeMode::Merge => "merge",
            TextMergeMode::MergeLists => "merge-lists",
            TextMergeMode::Discard => "discard",
        };
        f.write_str(name)
    }
}

/// Decode the list encoding of a text value
pub fn decode_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    if value.contains('[') && value.contains(']') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
            return list;
        }
    }
    vec![value.to_string()]
}

/// Encode a list of values; the inverse of [`decode_list`]
pub fn encode_list(mut values: Vec<String>) -> String {
    match values.len() {
        0 => String::new(),
        1 => values.remove(0),
        _ => serde_json::Value::from(values).to_string(),
    }
}
