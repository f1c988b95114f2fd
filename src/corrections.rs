//! Manual override table from known-bad spellings to canonical spellings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::constants::{AMBIGUOUS_MARKER, AMBIGUOUS_SEPARATOR};
use crate::error::Result;
use crate::normalize::normalize;
use crate::segment::{split_composite, split_person_name};
use crate::types::Category;

/// Result of looking a raw value up in the correction map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corrected {
    pub value: String,
    /// Present in the map, so exempt from completeness validation
    pub authorized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectionMap {
    entries: BTreeMap<String, String>,
}

impl CorrectionMap {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Load the map from a JSON file. A missing or malformed file yields an
    /// empty map; corrections are best-effort and never abort a run.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), "Correction map not loaded: {}", e);
                return Self::default();
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(entries) => {
                info!(path = %path.display(), entries = entries.len(), "Loaded correction map");
                Self { entries }
            }
            Err(e) => {
                warn!(path = %path.display(), "Correction map is malformed, ignoring it: {}", e);
                Self::default()
            }
        }
    }

    /// Write the map as pretty-printed JSON with sorted keys
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Look `raw` up verbatim
    pub fn apply(&self, raw: &str) -> Corrected {
        match self.entries.get(raw) {
            Some(canonical) if is_ambiguity_marker(canonical) => {
                debug!(value = raw, "Correction entry awaits manual review, using raw value");
                Corrected {
                    value: raw.to_string(),
                    authorized: false,
                }
            }
            Some(canonical) => Corrected {
                value: canonical.clone(),
                authorized: true,
            },
            None => Corrected {
                value: raw.to_string(),
                authorized: false,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, raw: &str) -> Option<&str> {
        self.entries.get(raw).map(String::as_str)
    }

    /// Add generated entries without overwriting ones already present,
    /// so manual edits survive regeneration. Returns how many were added.
    pub fn merge_generated(&mut self, generated: CorrectionMap) -> usize {
        let mut added = 0;
        for (raw, canonical) in generated.entries {
            if !self.entries.contains_key(&raw) {
                self.entries.insert(raw, canonical);
                added += 1;
            }
        }
        added
    }

    /// Build a correction map from the raw values observed per category.
    ///
    /// Spellings that normalize identically are mapped onto the first one
    /// seen. A bare family name matching several distinct full names is
    /// mapped to an `AMBIGUOUS: a | b` marker for manual resolution.
    pub fn generate<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = (Category, &'a str)>,
    {
        let mut per_category: HashMap<Category, Vec<String>> = HashMap::new();
        for (category, raw) in samples {
            let values = per_category.entry(category).or_default();
            // keys must match what the resolver is handed: composer and
            // soloist fields are split before resolution, the rest are not
            if matches!(category, Category::Composer | Category::Soloist) {
                values.extend(split_composite(raw));
            } else {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    values.push(trimmed.to_string());
                }
            }
        }

        let mut entries = BTreeMap::new();
        for category in Category::ALL {
            if let Some(values) = per_category.get(&category) {
                generate_for_category(category, values, &mut entries);
            }
        }

        Self { entries }
    }
}

fn generate_for_category(category: Category, values: &[String], entries: &mut BTreeMap<String, String>) {
    let mut first_seen: HashMap<String, &str> = HashMap::new();
    // normalized family -> distinct full names, in first-seen order
    let mut family_index: HashMap<String, Vec<(String, &str)>> = HashMap::new();

    for raw in values {
        let key = normalize(raw);
        if key.is_empty() {
            continue;
        }

        match first_seen.get(&key) {
            Some(first) if *first != raw.as_str() => {
                entries.entry(raw.clone()).or_insert_with(|| first.to_string());
            }
            Some(_) => {}
            None => {
                first_seen.insert(key.clone(), raw.as_str());
            }
        }

        if category.is_person() {
            let (given, family) = split_person_name(raw);
            if !given.is_empty() {
                let full_names = family_index.entry(normalize(&family)).or_default();
                if !full_names.iter().any(|(k, _)| *k == key) {
                    full_names.push((key, first_seen_value(&first_seen, raw)));
                }
            }
        }
    }

    if !category.is_person() {
        return;
    }

    for raw in values {
        let (given, family) = split_person_name(raw);
        if !given.is_empty() || entries.contains_key(raw) {
            continue;
        }
        if let Some(full_names) = family_index.get(&normalize(&family)) {
            if full_names.len() > 1 {
                let candidates: Vec<&str> = full_names.iter().map(|(_, display)| *display).collect();
                entries.insert(raw.clone(), ambiguity_marker(&candidates));
            }
        }
    }
}

fn first_seen_value<'a>(first_seen: &HashMap<String, &'a str>, raw: &'a str) -> &'a str {
    first_seen.get(&normalize(raw)).copied().unwrap_or(raw)
}

pub fn ambiguity_marker(candidates: &[&str]) -> String {
    format!("{}{}", AMBIGUOUS_MARKER, candidates.join(AMBIGUOUS_SEPARATOR))
}

pub fn is_ambiguity_marker(value: &str) -> bool {
    value.starts_with(AMBIGUOUS_MARKER.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_apply_hit_and_miss() {
        let map = CorrectionMap::new([("Karajan".to_string(), "Herbert von Karajan".to_string())]);

        let hit = map.apply("Karajan");
        assert_eq!(hit.value, "Herbert von Karajan");
        assert!(hit.authorized);

        let miss = map.apply("karajan");
        assert_eq!(miss.value, "karajan");
        assert!(!miss.authorized);
    }

    #[test]
    fn test_apply_ambiguity_marker_is_not_a_correction() {
        let map = CorrectionMap::new([(
            "Bach".to_string(),
            "AMBIGUOUS: Johann Sebastian Bach | Carl Philipp Emanuel Bach".to_string(),
        )]);
        let corrected = map.apply("Bach");
        assert_eq!(corrected.value, "Bach");
        assert!(!corrected.authorized);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let map = CorrectionMap::load(&dir.path().join("nope.json"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_load_malformed_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(CorrectionMap::load(&path).is_empty());

        fs::write(&path, r#"["a", "b"]"#).unwrap();
        assert!(CorrectionMap::load(&path).is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("corrections.json");
        let map = CorrectionMap::new([("Mozard".to_string(), "Mozart".to_string())]);
        map.save(&path).unwrap();

        let loaded = CorrectionMap::load(&path);
        assert_eq!(loaded.get("Mozard"), Some("Mozart"));
    }

    #[test]
    fn test_generate_maps_later_spelling_to_first() {
        let map = CorrectionMap::generate([
            (Category::Conductor, "Herbert von Karajan"),
            (Category::Conductor, "HERBERT VON KARAJAN"),
            (Category::Conductor, "Herbert von Karajan"),
            (Category::Orchestra, "Wiener Philharmoniker"),
            (Category::Orchestra, "Wiener Philharmoniker "),
        ]);

        assert_eq!(map.get("HERBERT VON KARAJAN"), Some("Herbert von Karajan"));
        assert_eq!(map.get("Herbert von Karajan"), None);
        // trimmed, so identical to the first spelling
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_generate_flags_ambiguous_family_name() {
        let map = CorrectionMap::generate([
            (Category::Composer, "Johann Sebastian Bach"),
            (Category::Composer, "Carl Philipp Emanuel Bach"),
            (Category::Composer, "Bach"),
            (Category::Composer, "Johannes Brahms"),
            (Category::Composer, "Brahms"),
        ]);

        assert_eq!(
            map.get("Bach"),
            Some("AMBIGUOUS: Johann Sebastian Bach | Carl Philipp Emanuel Bach")
        );
        // single candidate is left to the name index at resolution time
        assert_eq!(map.get("Brahms"), None);
    }

    #[test]
    fn test_generate_splits_composite_fields() {
        let map = CorrectionMap::generate([
            (Category::Soloist, "Anne-Sophie Mutter, Yo-Yo Ma"),
            (Category::Soloist, "anne-sophie mutter u.a."),
        ]);
        assert_eq!(map.get("anne-sophie mutter"), Some("Anne-Sophie Mutter"));
    }

    #[test]
    fn test_generate_keeps_single_valued_fields_whole() {
        let map = CorrectionMap::generate([
            (Category::Orchestra, "Chor und Orchester des BR"),
            (Category::Orchestra, "CHOR UND ORCHESTER DES BR"),
            (Category::Conductor, "Böhm, Karl"),
            (Category::Conductor, "BÖHM, KARL"),
            (Category::Venue, "Herkulessaal / Residenz"),
        ]);

        assert_eq!(map.get("CHOR UND ORCHESTER DES BR"), Some("Chor und Orchester des BR"));
        assert_eq!(map.get("BÖHM, KARL"), Some("Böhm, Karl"));
        assert_eq!(map.get("CHOR"), None);
        assert_eq!(map.get("KARL"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_merge_keeps_manual_entries() {
        let mut existing = CorrectionMap::new([("Bach".to_string(), "Johann Sebastian Bach".to_string())]);
        let generated = CorrectionMap::new([
            ("Bach".to_string(), "AMBIGUOUS: x | y".to_string()),
            ("Mozard".to_string(), "Mozart".to_string()),
        ]);

        assert_eq!(existing.merge_generated(generated), 1);
        assert_eq!(existing.get("Bach"), Some("Johann Sebastian Bach"));
        assert_eq!(existing.get("Mozard"), Some("Mozart"));
    }
}
