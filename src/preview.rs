use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

pub const DEFAULT_PREVIEW_WORDS: usize = 12;

/// Drops markup tags and decodes the handful of entities the editor emits.
pub fn strip_markup(markup: &str) -> String {
    let without_tags = MARKUP_TAG.replace_all(markup, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps the first `max_words` words, appending `...` when anything was cut.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    format!("{}...", words[..max_words].join(" "))
}

pub fn preview(markup: &str, max_words: usize) -> String {
    truncate_words(&strip_markup(markup), max_words)
}

/// Case-insensitive literal matcher for a search term; `None` when there is
/// nothing to look for.
pub fn search_pattern(term: &str) -> Option<Regex> {
    if term.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Wraps every match of `pattern` in `open`/`close`.
pub fn mark_matches(text: &str, pattern: &Regex, open: &str, close: &str) -> String {
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| format!("{open}{}{close}", &caps[0]))
        .into_owned()
}
