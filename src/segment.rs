//! Splitting of person names and multi-valued free-text fields.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::FILLER_TOKENS;

static FILLER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)u\. ?a\.|etc\.").unwrap());

static COMPOSITE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[,/]|\bund\b").unwrap());

/// Split a person's display name into `(given_name, family_name)`.
///
/// `Schumann;Clara` is read as `family;given`. Otherwise the last
/// whitespace-delimited token is the family name.
pub fn split_person_name(full: &str) -> (String, String) {
    let full = full.trim();

    if let Some((family, given)) = full.split_once(';') {
        return (given.trim().to_string(), family.trim().to_string());
    }

    let mut tokens: Vec<&str> = full.split_whitespace().collect();
    match tokens.pop() {
        Some(family) => (tokens.join(" "), family.to_string()),
        None => (String::new(), String::new()),
    }
}

/// Split a multi-composer or multi-soloist field into candidate names,
/// in order of appearance, after dropping "and others" fillers.
pub fn split_composite(raw: &str) -> Vec<String> {
    let cleaned = FILLER.replace_all(raw, "");

    COMPOSITE_SEPARATOR
        .split(&cleaned)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when the text carries an "and others" filler anywhere.
pub fn contains_filler(raw: &str) -> bool {
    FILLER.is_match(raw)
}

/// True when the value is a filler token or ends with one.
pub fn is_filler_value(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    FILLER_TOKENS
        .iter()
        .any(|token| lowered == *token || lowered.ends_with(token))
}
