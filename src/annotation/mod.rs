//! Row metadata and the rules for merging it
//!
//! Rows carry two kinds of named metadata:
//!
//! - [`TextAnnotation`]: a string value, merged with a [`TextMergeMode`]
//! - [`DataAnnotation`]: a shared [`VirtualItem`](crate::item::VirtualItem),
//!   merged with a [`DataMergeMode`]
//!
//! Every merge mode is total: any input produces a result, never an error.

pub mod data;
pub mod text;

pub use data::{DataAnnotation, DataMergeMode};
pub use text::{TextAnnotation, TextMergeMode};

/// Group values by name, keeping names in order of first appearance
pub(crate) fn group_by_name<'a, T, F>(items: &'a [T], name_of: F) -> Vec<(&'a str, Vec<&'a T>)>
where
    F: Fn(&'a T) -> &'a str,
{
    let mut groups: Vec<(&'a str, Vec<&'a T>)> = Vec::new();
    for item in items {
        let name = name_of(item);
        match groups.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, members)) => members.push(item),
            None => groups.push((name, vec![item])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_name_keeps_first_appearance_order() {
        let items = vec![("b", 1), ("a", 2), ("b", 3)];
        let groups = group_by_name(&items, |item| item.0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }
}
