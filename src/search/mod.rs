use std::cmp::Ordering;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::model::Note;
use crate::tags::strip_hash;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum SortKey {
    /// Most recently updated first.
    #[default]
    Updated,
    /// Most recently created first.
    Created,
    /// Title, A to Z.
    Title,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Criteria {
    pub search: String,
    /// Empty means no tag filter; a leading `#` is optional.
    pub tag: String,
    pub category: Option<String>,
    pub sort: SortKey,
}

impl Criteria {
    /// No search text, tag or category. Whitespace counts as search text.
    pub fn is_unfiltered(&self) -> bool {
        self.search.is_empty() && self.tag.is_empty() && self.category.is_none()
    }
}

/// Derives the displayed note list. Pure: identical inputs give identical output.
pub fn filter_and_sort<'a>(notes: &'a [Note], criteria: &Criteria) -> Vec<&'a Note> {
    let needle = criteria.search.to_lowercase();
    let wanted_tag = strip_hash(&criteria.tag);
    let mut view: Vec<&Note> = notes
        .iter()
        .filter(|note| matches_search(note, &needle))
        .filter(|note| criteria.tag.is_empty() || has_tag(note, wanted_tag))
        .filter(|note| match &criteria.category {
            Some(category) => note.category.as_deref() == Some(category.as_str()),
            None => true,
        })
        .collect();
    sort_notes(&mut view, criteria.sort);
    view
}

/// `needle` must already be lowercased. The empty needle matches everything.
pub fn matches_search(note: &Note, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    note.title.to_lowercase().contains(needle)
        || note.content.to_lowercase().contains(needle)
        || note
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(needle))
}

/// Exact tag equality after dropping one leading `#` on each side. Case-sensitive.
pub fn has_tag(note: &Note, wanted: &str) -> bool {
    note.tags.iter().any(|tag| strip_hash(tag) == wanted)
}

pub fn sort_notes(notes: &mut [&Note], key: SortKey) {
    match key {
        SortKey::Updated => notes.sort_by(|a, b| b.updated_key().cmp(&a.updated_key())),
        SortKey::Created => notes.sort_by(|a, b| b.created_key().cmp(&a.created_key())),
        SortKey::Title => notes.sort_by(|a, b| compare_titles(&a.title, &b.title)),
    }
}

/// Locale-style ordering: case-insensitive first, lowercase ahead of uppercase on ties.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

/// Every distinct tag across the collection, in first-seen order.
pub fn all_tags(notes: &[Note]) -> Vec<String> {
    let set: IndexSet<&str> = notes
        .iter()
        .flat_map(|note| note.tags.iter().map(String::as_str))
        .collect();
    set.into_iter().map(str::to_string).collect()
}

pub fn sorted_tags(notes: &[Note]) -> Vec<String> {
    let mut tags = all_tags(notes);
    tags.sort_by_key(|tag| tag.to_lowercase());
    tags
}

/// Narrows the tag picker by a case-insensitive substring.
pub fn filter_tag_choices<'a>(tags: &'a [String], query: &str) -> Vec<&'a str> {
    let query = query.trim().to_lowercase();
    tags.iter()
        .map(String::as_str)
        .filter(|tag| query.is_empty() || tag.to_lowercase().contains(&query))
        .collect()
}
