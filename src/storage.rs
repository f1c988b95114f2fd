use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::types::*;

/// Destination store consumed by the resolver and the reconciler
#[async_trait]
pub trait Storage: Send + Sync {
    // Pre-population
    async fn load_people(&self, category: Category) -> Result<Vec<PersonRow>>;
    async fn load_named(&self, category: Category) -> Result<Vec<NamedRow>>;
    async fn load_works(&self) -> Result<Vec<WorkRow>>;

    // Entity creation; each returns the generated id
    async fn insert_person(&self, category: Category, name: &PersonName) -> Result<EntityId>;
    async fn insert_named(&self, category: Category, name: &str) -> Result<EntityId>;
    async fn insert_work(&self, title: &str, composer_id: Option<EntityId>) -> Result<EntityId>;

    // Records, written together with their work and soloist links
    async fn record_exists(&self, id: EntityId) -> Result<bool>;
    async fn insert_record(&self, record: &NewRecord) -> Result<()>;

    // Documents
    async fn document_exists(&self, id: EntityId) -> Result<bool>;
    async fn insert_document(&self, document: &Document) -> Result<()>;

    /// Empty every destination collection before a fresh run
    async fn truncate_all(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    people: BTreeMap<Category, BTreeMap<EntityId, PersonName>>,
    named: BTreeMap<Category, BTreeMap<EntityId, String>>,
    works: BTreeMap<EntityId, (String, Option<EntityId>)>,
    records: BTreeMap<EntityId, NewRecord>,
    documents: BTreeMap<EntityId, Document>,
    next_id: EntityId,
}

impl Tables {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    fn entity_exists(&self, category: Category, id: EntityId) -> bool {
        match category.kind() {
            EntityKind::Person => self.people.get(&category).is_some_and(|t| t.contains_key(&id)),
            EntityKind::Named => self.named.get(&category).is_some_and(|t| t.contains_key(&id)),
            EntityKind::Work => self.works.contains_key(&id),
        }
    }
}

/// In-memory storage implementation for development/testing
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a person row, as if left by an earlier run
    pub fn seed_person(&self, category: Category, name: PersonName) -> EntityId {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.allocate_id();
        tables.people.entry(category).or_default().insert(id, name);
        id
    }

    pub fn seed_named(&self, category: Category, name: &str) -> EntityId {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.allocate_id();
        tables.named.entry(category).or_default().insert(id, name.to_string());
        id
    }

    pub fn seed_work(&self, title: &str, composer_id: Option<EntityId>) -> EntityId {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.allocate_id();
        tables.works.insert(id, (title.to_string(), composer_id));
        id
    }

    pub fn count(&self, category: Category) -> usize {
        let tables = self.tables.lock().unwrap();
        match category.kind() {
            EntityKind::Person => tables.people.get(&category).map_or(0, BTreeMap::len),
            EntityKind::Named => tables.named.get(&category).map_or(0, BTreeMap::len),
            EntityKind::Work => tables.works.len(),
        }
    }

    pub fn record(&self, id: EntityId) -> Option<NewRecord> {
        self.tables.lock().unwrap().records.get(&id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.tables.lock().unwrap().records.len()
    }

    pub fn document_count(&self) -> usize {
        self.tables.lock().unwrap().documents.len()
    }

    pub fn work(&self, id: EntityId) -> Option<(String, Option<EntityId>)> {
        self.tables.lock().unwrap().works.get(&id).cloned()
    }

    pub fn person(&self, category: Category, id: EntityId) -> Option<PersonName> {
        self.tables
            .lock()
            .unwrap()
            .people
            .get(&category)
            .and_then(|t| t.get(&id))
            .cloned()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn load_people(&self, category: Category) -> Result<Vec<PersonRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .people
            .get(&category)
            .map(|t| {
                t.iter()
                    .map(|(id, name)| PersonRow {
                        id: *id,
                        name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_named(&self, category: Category) -> Result<Vec<NamedRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .named
            .get(&category)
            .map(|t| {
                t.iter()
                    .map(|(id, name)| NamedRow {
                        id: *id,
                        name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_works(&self) -> Result<Vec<WorkRow>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .works
            .iter()
            .map(|(id, (title, composer_id))| WorkRow {
                id: *id,
                title: title.clone(),
                composer_id: *composer_id,
            })
            .collect())
    }

    async fn insert_person(&self, category: Category, name: &PersonName) -> Result<EntityId> {
        if name.family_name.is_empty() {
            return Err(MigrationError::storage(format!(
                "{} requires a family name",
                category.table()
            )));
        }
        let mut tables = self.tables.lock().unwrap();
        let id = tables.allocate_id();
        tables.people.entry(category).or_default().insert(id, name.clone());
        debug!("Created {}: {} with id {}", category, name.display_name(), id);
        Ok(id)
    }

    async fn insert_named(&self, category: Category, name: &str) -> Result<EntityId> {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.allocate_id();
        tables.named.entry(category).or_default().insert(id, name.to_string());
        debug!("Created {}: {} with id {}", category, name, id);
        Ok(id)
    }

    async fn insert_work(&self, title: &str, composer_id: Option<EntityId>) -> Result<EntityId> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(composer_id) = composer_id {
            if !tables.entity_exists(Category::Composer, composer_id) {
                return Err(MigrationError::storage(format!(
                    "work '{title}' references unknown composer {composer_id}"
                )));
            }
        }
        let id = tables.allocate_id();
        tables.works.insert(id, (title.to_string(), composer_id));
        debug!("Created work: {} with id {}", title, id);
        Ok(id)
    }

    async fn record_exists(&self, id: EntityId) -> Result<bool> {
        Ok(self.tables.lock().unwrap().records.contains_key(&id))
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.records.contains_key(&record.id) {
            return Err(MigrationError::storage(format!("duplicate record id {}", record.id)));
        }

        let references = [
            (Category::Venue, record.venue_id),
            (Category::Conductor, record.conductor_id),
            (Category::Orchestra, record.orchestra_id),
        ];
        for (category, id) in references {
            if let Some(id) = id {
                if !tables.entity_exists(category, id) {
                    return Err(MigrationError::storage(format!(
                        "record {} references unknown {} {}",
                        record.id, category, id
                    )));
                }
            }
        }
        let work_ids: BTreeSet<_> = record.work_ids.iter().collect();
        let soloist_ids: BTreeSet<_> = record.soloist_ids.iter().collect();
        if let Some(id) = work_ids.iter().find(|id| !tables.entity_exists(Category::Work, ***id)) {
            return Err(MigrationError::storage(format!(
                "record {} references unknown work {}",
                record.id, id
            )));
        }
        if let Some(id) = soloist_ids
            .iter()
            .find(|id| !tables.entity_exists(Category::Soloist, ***id))
        {
            return Err(MigrationError::storage(format!(
                "record {} references unknown soloist {}",
                record.id, id
            )));
        }

        tables.records.insert(record.id, record.clone());
        debug!("Created record {} '{}'", record.id, record.label);
        Ok(())
    }

    async fn document_exists(&self, id: EntityId) -> Result<bool> {
        Ok(self.tables.lock().unwrap().documents.contains_key(&id))
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.records.contains_key(&document.record_id) {
            return Err(MigrationError::storage(format!(
                "document {} references unknown record {}",
                document.id, document.record_id
            )));
        }
        if tables.documents.contains_key(&document.id) {
            return Err(MigrationError::storage(format!("duplicate document id {}", document.id)));
        }
        tables.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn truncate_all(&self) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        *tables = Tables::default();
        Ok(())
    }
}
