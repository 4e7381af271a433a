//! Free-text tag input → canonical `#tag` tokens.

use once_cell::sync::Lazy;
use regex::Regex;

static CANONICAL_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[A-Za-z0-9_]+$").expect("valid canonical tag pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedTags {
    /// Valid tags re-joined with single spaces, suitable for redisplay in the input.
    pub display: String,
    /// Canonical tags in first-occurrence order, without duplicates.
    pub valid: Vec<String>,
    /// Original text of every token that could not be normalized.
    pub invalid: Vec<String>,
}

impl NormalizedTags {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }

    pub fn validation_message(&self) -> Option<String> {
        if self.invalid.is_empty() {
            None
        } else {
            Some(format!("Invalid tags: {}", self.invalid.join(", ")))
        }
    }
}

/// Parses space- or comma-separated tag input. Never fails; bad tokens are
/// reported in [`NormalizedTags::invalid`].
pub fn normalize(input: &str) -> NormalizedTags {
    let mut out = NormalizedTags::default();
    let spaced = input.replace(',', " ");
    for token in spaced.split_whitespace() {
        match canonicalize(token) {
            Some(tag) => {
                if !out.valid.contains(&tag) {
                    out.valid.push(tag);
                }
            }
            None => out.invalid.push(token.to_string()),
        }
    }
    out.display = out.valid.join(" ");
    out
}

/// Returns true when `tag` is already in canonical form.
pub fn is_canonical(tag: &str) -> bool {
    CANONICAL_TAG.is_match(tag)
}

/// Drops a single leading `#`, the form used for tag equality.
pub fn strip_hash(tag: &str) -> &str {
    tag.strip_prefix('#').unwrap_or(tag)
}

fn canonicalize(token: &str) -> Option<String> {
    let prefixed = if token.starts_with('#') {
        token.to_string()
    } else {
        format!("#{token}")
    };
    // Non-ASCII letters are stripped too, keeping stored tags ASCII-only.
    let cleaned: String = prefixed
        .chars()
        .filter(|ch| *ch == '#' || *ch == '_' || ch.is_ascii_alphanumeric())
        .collect();
    if cleaned.len() < 2 || !is_canonical(&cleaned) {
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse_to_first_occurrence() {
        let tags = normalize("#work #work work");
        assert_eq!(tags.valid, vec!["#work"]);
        assert!(tags.invalid.is_empty());
        assert_eq!(tags.display, "#work");
    }

    #[test]
    fn lone_hash_is_reported_with_original_text() {
        let tags = normalize("# #a");
        assert_eq!(tags.valid, vec!["#a"]);
        assert_eq!(tags.invalid, vec!["#"]);
        assert_eq!(
            tags.validation_message().as_deref(),
            Some("Invalid tags: #")
        );
    }

    #[test]
    fn empty_and_blank_input_yield_nothing() {
        for input in ["", "   ", " , ,, "] {
            let tags = normalize(input);
            assert_eq!(tags, NormalizedTags::default(), "input {input:?}");
        }
    }

    #[test]
    fn commas_and_spaces_both_separate() {
        let tags = normalize("rust,  notes ,#todo_list");
        assert_eq!(tags.valid, vec!["#rust", "#notes", "#todo_list"]);
        assert_eq!(tags.display, "#rust #notes #todo_list");
    }

    #[test]
    fn punctuation_is_stripped_and_case_is_kept() {
        let tags = normalize("Work! work café");
        assert_eq!(tags.valid, vec!["#Work", "#work", "#caf"]);
    }

    #[test]
    fn tokens_that_strip_to_nothing_are_invalid() {
        let tags = normalize("## ??? 日本");
        assert!(tags.valid.is_empty());
        assert_eq!(tags.invalid, vec!["##", "???", "日本"]);
    }

    #[test]
    fn embedded_hash_fails_the_grammar() {
        let tags = normalize("a#b");
        assert!(tags.valid.is_empty());
        assert_eq!(tags.invalid, vec!["a#b"]);
    }

    #[test]
    fn every_valid_tag_is_canonical_and_unique() {
        let inputs = [
            "alpha beta, alpha",
            "#x ## #y_1 x",
            "  ,, héllo wörld #ok",
            "#A #a A a",
        ];
        for input in inputs {
            let tags = normalize(input);
            let mut seen = std::collections::HashSet::new();
            for tag in &tags.valid {
                assert!(is_canonical(tag), "{tag} from {input:?}");
                assert!(tag.len() >= 2);
                assert!(seen.insert(tag.clone()), "duplicate {tag} from {input:?}");
            }
        }
    }

    #[test]
    fn strip_hash_removes_only_one_prefix() {
        assert_eq!(strip_hash("#work"), "work");
        assert_eq!(strip_hash("##work"), "#work");
        assert_eq!(strip_hash("work"), "work");
    }
}
