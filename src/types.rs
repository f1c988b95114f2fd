use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::*;
use crate::segment::split_person_name;

/// Destination-assigned row identifier.
pub type EntityId = i64;

/// The fixed set of entity categories the resolver knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Conductor,
    Orchestra,
    Composer,
    Work,
    Soloist,
    Venue,
}

/// How a category is identified and stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// given + family name, indexed by family name
    Person,
    /// a single name column
    Named,
    /// title qualified by composer
    Work,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Conductor,
        Category::Orchestra,
        Category::Composer,
        Category::Work,
        Category::Soloist,
        Category::Venue,
    ];

    pub const PEOPLE: [Category; 3] = [Category::Conductor, Category::Composer, Category::Soloist];

    pub const NAMED: [Category; 2] = [Category::Orchestra, Category::Venue];

    pub const fn kind(self) -> EntityKind {
        match self {
            Category::Conductor | Category::Composer | Category::Soloist => EntityKind::Person,
            Category::Orchestra | Category::Venue => EntityKind::Named,
            Category::Work => EntityKind::Work,
        }
    }

    pub const fn is_person(self) -> bool {
        matches!(self.kind(), EntityKind::Person)
    }

    pub const fn table(self) -> &'static str {
        match self {
            Category::Conductor => TABLE_CONDUCTORS,
            Category::Orchestra => TABLE_ORCHESTRAS,
            Category::Composer => TABLE_COMPOSERS,
            Category::Work => TABLE_WORKS,
            Category::Soloist => TABLE_SOLOISTS,
            Category::Venue => TABLE_VENUES,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Conductor => "conductor",
            Category::Orchestra => "orchestra",
            Category::Composer => "composer",
            Category::Work => "work",
            Category::Soloist => "soloist",
            Category::Venue => "venue",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person-like entity's name parts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonName {
    pub given_name: String,
    pub family_name: String,
}

impl PersonName {
    pub fn new(given_name: impl Into<String>, family_name: impl Into<String>) -> Self {
        Self {
            given_name: given_name.into(),
            family_name: family_name.into(),
        }
    }

    /// Parse a display string, honoring the `family;given` form
    pub fn parse(full: &str) -> Self {
        let (given_name, family_name) = split_person_name(full);
        Self {
            given_name,
            family_name,
        }
    }

    pub fn has_given_name(&self) -> bool {
        !self.given_name.is_empty()
    }

    /// "given family", or just the family name when no given name is known
    pub fn display_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
            .trim()
            .to_string()
    }
}

/// Work identity: normalized title qualified by the composer reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    pub title: String,
    pub composer_id: Option<EntityId>,
}

impl WorkKey {
    pub fn new(title: impl Into<String>, composer_id: Option<EntityId>) -> Self {
        Self {
            title: title.into(),
            composer_id,
        }
    }
}

/// Existing destination row of a person-like table
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRow {
    pub id: EntityId,
    pub name: PersonName,
}

/// Existing destination row of a single-name table
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRow {
    pub id: EntityId,
    pub name: String,
}

/// Existing destination work row
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRow {
    pub id: EntityId,
    pub title: String,
    pub composer_id: Option<EntityId>,
}

/// A concert record as stored in the legacy database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub id: EntityId,
    pub composer: String,
    pub work: String,
    pub orchestra: String,
    pub conductor: String,
    pub soloist: String,
    pub date: Option<NaiveDateTime>,
    pub season: String,
    pub rating_1: String,
    pub rating_2: String,
    pub venue: String,
}

impl LegacyRecord {
    /// Both rating texts, trimmed, joined by a newline; empty parts omitted
    pub fn combined_rating(&self) -> String {
        [self.rating_1.trim(), self.rating_2.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The migrated record with every reference already resolved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub id: EntityId,
    pub label: String,
    pub date: Option<NaiveDateTime>,
    pub season: String,
    pub rating: String,
    pub venue_id: Option<EntityId>,
    pub conductor_id: Option<EntityId>,
    pub orchestra_id: Option<EntityId>,
    pub work_ids: Vec<EntityId>,
    pub soloist_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Pdf,
    Image,
    Audio,
    Other,
}

impl DocumentType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => DocumentType::Pdf,
            1 => DocumentType::Image,
            2 => DocumentType::Audio,
            _ => DocumentType::Other,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            DocumentType::Pdf => 0,
            DocumentType::Image => 1,
            DocumentType::Audio => 2,
            DocumentType::Other => 3,
        }
    }
}

/// A file attached to a record; identical shape in source and destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: EntityId,
    pub file_name: String,
    pub encrypted_name: String,
    pub document_type: DocumentType,
    pub record_id: EntityId,
    pub reserved: bool,
}
