//! Canonical equality key for entity names.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// "v." or "v " standing alone, the usual abbreviation of "van"/"von".
static ABBREVIATED_VAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bv(?:\.\s*|\s+)").unwrap());

/// Normalize a display string for identity comparison.
///
/// Lowercases, strips diacritics, expands the `v.` abbreviation to `van `
/// and trims. Two inputs denote the same entity if and only if their
/// normalized forms are equal.
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let lowered = raw.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let expanded = ABBREVIATED_VAN.replace_all(&stripped, "van ");

    expanded.trim().to_string()
}
