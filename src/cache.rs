//! Process-scoped store of resolved entities plus the family-name index.

use std::collections::{BTreeSet, HashMap};

use crate::normalize::normalize;
use crate::types::{Category, EntityId, NamedRow, PersonName, PersonRow, WorkKey, WorkRow};

/// Normalized key -> destination id, per category, plus composer-qualified works
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: HashMap<Category, HashMap<String, EntityId>>,
    works: HashMap<WorkKey, EntityId>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category, key: &str) -> Option<EntityId> {
        self.entries.get(&category)?.get(key).copied()
    }

    /// Keeps the first id seen for a key
    pub fn insert(&mut self, category: Category, key: String, id: EntityId) {
        self.entries
            .entry(category)
            .or_default()
            .entry(key)
            .or_insert(id);
    }

    pub fn get_work(&self, key: &WorkKey) -> Option<EntityId> {
        self.works.get(key).copied()
    }

    pub fn insert_work(&mut self, key: WorkKey, id: EntityId) {
        self.works.entry(key).or_insert(id);
    }

    pub fn len(&self, category: Category) -> usize {
        match category {
            Category::Work => self.works.len(),
            _ => self.entries.get(&category).map_or(0, HashMap::len),
        }
    }

    pub fn load_people(&mut self, category: Category, rows: &[PersonRow]) {
        for row in rows {
            let key = person_key(&row.name);
            if !key.is_empty() {
                self.insert(category, key, row.id);
            }
        }
    }

    pub fn load_named(&mut self, category: Category, rows: &[NamedRow]) {
        for row in rows {
            let key = normalize(&row.name);
            if !key.is_empty() {
                self.insert(category, key, row.id);
            }
        }
    }

    pub fn load_works(&mut self, rows: &[WorkRow]) {
        for row in rows {
            self.insert_work(WorkKey::new(normalize(&row.title), row.composer_id), row.id);
        }
    }
}

/// Normalized full-name key of a person
pub fn person_key(name: &PersonName) -> String {
    normalize(&name.display_name())
}

/// Normalized family name -> every known `(normalized full name, id)` sharing it
#[derive(Debug, Default)]
pub struct NameIndex {
    by_family: HashMap<Category, HashMap<String, BTreeSet<(String, EntityId)>>>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, name: &PersonName, id: EntityId) {
        let family = normalize(&name.family_name);
        if family.is_empty() {
            return;
        }
        self.by_family
            .entry(category)
            .or_default()
            .entry(family)
            .or_default()
            .insert((person_key(name), id));
    }

    pub fn load(&mut self, category: Category, rows: &[PersonRow]) {
        for row in rows {
            self.insert(category, &row.name, row.id);
        }
    }

    /// Distinct ids of every entity whose normalized family name matches
    pub fn candidates(&self, category: Category, family_key: &str) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .by_family
            .get(&category)
            .and_then(|index| index.get(family_key))
            .map(|entries| entries.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Full-name keys for a family name, for operator prompts
    pub fn full_names(&self, category: Category, family_key: &str) -> Vec<(String, EntityId)> {
        self.by_family
            .get(&category)
            .and_then(|index| index.get(family_key))
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}
