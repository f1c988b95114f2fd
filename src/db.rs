use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::constants::*;
use crate::error::{MigrationError, Result};
use crate::source::LegacySource;
use crate::storage::Storage;
use crate::types::*;

const DESTINATION_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS Dirigenten (
    Id       INTEGER PRIMARY KEY AUTOINCREMENT,
    Vorname  TEXT NOT NULL DEFAULT '',
    Name     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Komponisten (
    Id       INTEGER PRIMARY KEY AUTOINCREMENT,
    Vorname  TEXT NOT NULL DEFAULT '',
    Name     TEXT NOT NULL,
    Note     TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS Solisten (
    Id       INTEGER PRIMARY KEY AUTOINCREMENT,
    Vorname  TEXT NOT NULL DEFAULT '',
    Name     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Orchester (
    Id    INTEGER PRIMARY KEY AUTOINCREMENT,
    Name  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Orte (
    Id    INTEGER PRIMARY KEY AUTOINCREMENT,
    Name  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Werke (
    Id           INTEGER PRIMARY KEY AUTOINCREMENT,
    Name         TEXT NOT NULL,
    KomponistId  INTEGER REFERENCES Komponisten(Id)
);
CREATE TABLE IF NOT EXISTS MusicRecords (
    Id           INTEGER PRIMARY KEY,
    Bezeichnung  TEXT NOT NULL DEFAULT '',
    Datum        TEXT,
    Spielsaison  TEXT NOT NULL DEFAULT '',
    Bewertung    TEXT NOT NULL DEFAULT '',
    OrtId        INTEGER REFERENCES Orte(Id),
    DirigentId   INTEGER REFERENCES Dirigenten(Id),
    OrchesterId  INTEGER REFERENCES Orchester(Id)
);
CREATE TABLE IF NOT EXISTS MusicRecordWerk (
    MusicRecordsId  INTEGER NOT NULL REFERENCES MusicRecords(Id),
    WerkeId         INTEGER NOT NULL REFERENCES Werke(Id),
    PRIMARY KEY (MusicRecordsId, WerkeId)
);
CREATE TABLE IF NOT EXISTS MusicRecordSolist (
    MusicRecordsId  INTEGER NOT NULL REFERENCES MusicRecords(Id),
    SolistenId      INTEGER NOT NULL REFERENCES Solisten(Id),
    PRIMARY KEY (MusicRecordsId, SolistenId)
);
CREATE TABLE IF NOT EXISTS Documents (
    Id             INTEGER PRIMARY KEY,
    FileName       TEXT NOT NULL,
    EncryptedName  TEXT NOT NULL,
    DocumentType   INTEGER NOT NULL,
    MusicRecordId  INTEGER NOT NULL REFERENCES MusicRecords(Id),
    Vormerken      INTEGER NOT NULL DEFAULT 0
);
"#;

/// Destination database in the schema the concert application reads
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (creating if needed) the destination database and its schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening destination database at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(DESTINATION_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Row count of one destination table
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Work and soloist ids linked to a record
    pub fn record_links(&self, record_id: EntityId) -> Result<(Vec<EntityId>, Vec<EntityId>)> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT WerkeId FROM MusicRecordWerk WHERE MusicRecordsId = ?1 ORDER BY WerkeId",
        )?;
        let works = stmt
            .query_map(params![record_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<EntityId>>>()?;
        let mut stmt = conn.prepare(
            "SELECT SolistenId FROM MusicRecordSolist WHERE MusicRecordsId = ?1 ORDER BY SolistenId",
        )?;
        let soloists = stmt
            .query_map(params![record_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<EntityId>>>()?;
        Ok((works, soloists))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load_people(&self, category: Category) -> Result<Vec<PersonRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT Id, Vorname, Name FROM {} ORDER BY Id",
            category.table()
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PersonRow {
                    id: row.get(0)?,
                    name: PersonName::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn load_named(&self, category: Category) -> Result<Vec<NamedRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT Id, Name FROM {} ORDER BY Id", category.table()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NamedRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn load_works(&self) -> Result<Vec<WorkRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT Id, Name, KomponistId FROM Werke ORDER BY Id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WorkRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    composer_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn insert_person(&self, category: Category, name: &PersonName) -> Result<EntityId> {
        if name.family_name.is_empty() {
            return Err(MigrationError::storage(format!(
                "{} requires a family name",
                category.table()
            )));
        }
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO {} (Vorname, Name) VALUES (?1, ?2)", category.table()),
            params![name.given_name, name.family_name],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created {}: {} with id {}", category, name.display_name(), id);
        Ok(id)
    }

    async fn insert_named(&self, category: Category, name: &str) -> Result<EntityId> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO {} (Name) VALUES (?1)", category.table()),
            params![name],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created {}: {} with id {}", category, name, id);
        Ok(id)
    }

    async fn insert_work(&self, title: &str, composer_id: Option<EntityId>) -> Result<EntityId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO Werke (Name, KomponistId) VALUES (?1, ?2)",
            params![title, composer_id],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created work: {} with id {}", title, id);
        Ok(id)
    }

    async fn record_exists(&self, id: EntityId) -> Result<bool> {
        let found = self
            .conn()
            .query_row("SELECT 1 FROM MusicRecords WHERE Id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO MusicRecords
                (Id, Bezeichnung, Datum, Spielsaison, Bewertung, OrtId, DirigentId, OrchesterId)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.label,
                record.date,
                record.season,
                record.rating,
                record.venue_id,
                record.conductor_id,
                record.orchestra_id,
            ],
        )?;
        for work_id in &record.work_ids {
            tx.execute(
                "INSERT OR IGNORE INTO MusicRecordWerk (MusicRecordsId, WerkeId) VALUES (?1, ?2)",
                params![record.id, work_id],
            )?;
        }
        for soloist_id in &record.soloist_ids {
            tx.execute(
                "INSERT OR IGNORE INTO MusicRecordSolist (MusicRecordsId, SolistenId) VALUES (?1, ?2)",
                params![record.id, soloist_id],
            )?;
        }
        tx.commit()?;
        debug!("Created record {} '{}'", record.id, record.label);
        Ok(())
    }

    async fn document_exists(&self, id: EntityId) -> Result<bool> {
        let found = self
            .conn()
            .query_row("SELECT 1 FROM Documents WHERE Id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        self.conn().execute(
            "INSERT INTO Documents (Id, FileName, EncryptedName, DocumentType, MusicRecordId, Vormerken)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.id,
                document.file_name,
                document.encrypted_name,
                document.document_type.code(),
                document.record_id,
                document.reserved,
            ],
        )?;
        Ok(())
    }

    async fn truncate_all(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in TRUNCATE_ORDER {
            let deleted = tx.execute(&format!("DELETE FROM {table}"), [])?;
            debug!("Cleared {} rows from {}", deleted, table);
        }
        tx.commit()?;
        info!("Destination database cleared");
        Ok(())
    }
}

/// Legacy database, opened read-only
pub struct SqliteSource {
    conn: Mutex<Connection>,
}

impl SqliteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening legacy database at {}", path.display());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

fn text(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Legacy dates are free text in a handful of layouts; anything else is dropped
fn parse_legacy_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    ["%Y-%m-%d", "%d.%m.%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[async_trait]
impl LegacySource for SqliteSource {
    async fn fetch_records(&self) -> Result<Vec<LegacyRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT Id, Komponist, Werk, Orchester, Dirigent, Solist, Datum, Spielsaison,
                    Bewertung1, Bewertung2, Ort
             FROM MusicRecords ORDER BY Id",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(LegacyRecord {
                    id: row.get(0)?,
                    composer: text(row, 1)?,
                    work: text(row, 2)?,
                    orchestra: text(row, 3)?,
                    conductor: text(row, 4)?,
                    soloist: text(row, 5)?,
                    date: row
                        .get::<_, Option<String>>(6)
                        .ok()
                        .flatten()
                        .and_then(|raw| parse_legacy_date(&raw)),
                    season: text(row, 7)?,
                    rating_1: text(row, 8)?,
                    rating_2: text(row, 9)?,
                    venue: text(row, 10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        info!("Fetched {} legacy records", records.len());
        Ok(records)
    }

    async fn fetch_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT Id, FileName, EncryptedName, DocumentType, MusicRecordId, Vormerken
             FROM Documents ORDER BY Id",
        )?;
        let documents = stmt
            .query_map([], |row| {
                Ok(Document {
                    id: row.get(0)?,
                    file_name: text(row, 1)?,
                    encrypted_name: text(row, 2)?,
                    document_type: DocumentType::from_code(row.get::<_, Option<i64>>(3)?.unwrap_or(-1)),
                    record_id: row.get(4)?,
                    reserved: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        info!("Fetched {} legacy documents", documents.len());
        Ok(documents)
    }
}
