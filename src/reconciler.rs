use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::corrections::CorrectionMap;
use crate::error::Result;
use crate::oracle::Oracle;
use crate::resolver::Resolver;
use crate::segment::split_composite;
use crate::source::LegacySource;
use crate::storage::Storage;
use crate::types::{Category, Document, LegacyRecord, NewRecord};

/// One invocation of a migration step, for log correlation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationRun {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run: MigrationRun,
    pub total: usize,
    pub migrated: usize,
    /// Already present in the destination
    pub skipped_existing: usize,
    /// Documents whose record is missing
    pub skipped_orphans: usize,
    pub failed: usize,
}

impl MigrationReport {
    fn new(run: MigrationRun, total: usize) -> Self {
        Self {
            run,
            total,
            migrated: 0,
            skipped_existing: 0,
            skipped_orphans: 0,
            failed: 0,
        }
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} total, {} migrated, {} already present, {} orphaned, {} failed",
            self.run.name, self.total, self.migrated, self.skipped_existing, self.skipped_orphans, self.failed
        )
    }
}

enum Outcome {
    Migrated(NewRecord),
    AlreadyPresent,
}

/// Drives legacy records and documents into the destination
pub struct Reconciler {
    storage: Arc<dyn Storage>,
    source: Arc<dyn LegacySource>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("storage", &"<Arc<dyn Storage>>")
            .field("source", &"<Arc<dyn LegacySource>>")
            .finish()
    }
}

impl Reconciler {
    pub fn new(storage: Arc<dyn Storage>, source: Arc<dyn LegacySource>) -> Self {
        Self { storage, source }
    }

    /// Migrate every legacy record not yet in the destination. A record
    /// that fails is logged and counted; the run goes on.
    #[instrument(skip(self, resolver, oracle))]
    pub async fn migrate_records(
        &self,
        resolver: &mut Resolver,
        oracle: Option<&dyn Oracle>,
    ) -> Result<MigrationReport> {
        let run = MigrationRun::new("records");
        info!(run_id = %run.id, "Starting record migration");

        let records = self.source.fetch_records().await?;
        let mut report = MigrationReport::new(run, records.len());

        for record in &records {
            let span = info_span!("record", record_id = record.id);
            match self.migrate_record(resolver, oracle, record).instrument(span).await {
                Ok(Outcome::Migrated(new_record)) => {
                    debug!(
                        record_id = record.id,
                        works = new_record.work_ids.len(),
                        soloists = new_record.soloist_ids.len(),
                        "Migrated record"
                    );
                    report.migrated += 1;
                }
                Ok(Outcome::AlreadyPresent) => {
                    debug!(record_id = record.id, "Record already migrated, skipping");
                    report.skipped_existing += 1;
                }
                Err(e) => {
                    error!(record_id = record.id, "Failed to migrate record: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.run.finish();
        let stats = resolver.stats();
        info!(
            run_id = %report.run.id,
            migrated = report.migrated,
            skipped_existing = report.skipped_existing,
            failed = report.failed,
            entities_created = stats.total_created(),
            references_skipped = stats.skipped,
            placeholders = stats.placeholders,
            "Finished record migration"
        );
        Ok(report)
    }

    async fn migrate_record(
        &self,
        resolver: &mut Resolver,
        oracle: Option<&dyn Oracle>,
        record: &LegacyRecord,
    ) -> Result<Outcome> {
        if self.storage.record_exists(record.id).await? {
            return Ok(Outcome::AlreadyPresent);
        }

        let conductor_id = resolver.resolve(Category::Conductor, &record.conductor).await?.id();
        let orchestra_id = resolver.resolve(Category::Orchestra, &record.orchestra).await?.id();
        let venue_id = resolver.resolve(Category::Venue, &record.venue).await?.id();

        let rating = record.combined_rating();
        let work_ids = resolver
            .resolve_works(&record.composer, &record.work, &rating, oracle)
            .await?;

        let mut soloist_ids = Vec::new();
        for soloist in split_composite(&record.soloist) {
            if let Some(id) = resolver.resolve(Category::Soloist, &soloist).await?.id() {
                if !soloist_ids.contains(&id) {
                    soloist_ids.push(id);
                }
            }
        }

        let new_record = NewRecord {
            id: record.id,
            label: record.work.trim().to_string(),
            date: record.date,
            season: record.season.trim().to_string(),
            rating,
            venue_id,
            conductor_id,
            orchestra_id,
            work_ids,
            soloist_ids,
        };
        self.storage.insert_record(&new_record).await?;
        Ok(Outcome::Migrated(new_record))
    }

    /// Copy documents whose record exists in the destination
    #[instrument(skip(self))]
    pub async fn migrate_documents(&self) -> Result<MigrationReport> {
        let run = MigrationRun::new("documents");
        info!(run_id = %run.id, "Starting document migration");

        let documents = self.source.fetch_documents().await?;
        let mut report = MigrationReport::new(run, documents.len());

        for document in &documents {
            if let Err(e) = self.migrate_document(document, &mut report).await {
                error!(document_id = document.id, "Failed to migrate document: {}", e);
                report.failed += 1;
            }
        }

        report.run.finish();
        info!(
            run_id = %report.run.id,
            migrated = report.migrated,
            skipped_orphans = report.skipped_orphans,
            failed = report.failed,
            "Finished document migration"
        );
        Ok(report)
    }

    async fn migrate_document(&self, document: &Document, report: &mut MigrationReport) -> Result<()> {
        if !self.storage.record_exists(document.record_id).await? {
            warn!(
                document_id = document.id,
                record_id = document.record_id,
                "Document references a record that was not migrated, skipping"
            );
            report.skipped_orphans += 1;
            return Ok(());
        }
        if self.storage.document_exists(document.id).await? {
            report.skipped_existing += 1;
            return Ok(());
        }
        self.storage.insert_document(document).await?;
        report.migrated += 1;
        Ok(())
    }

    /// Empty the destination for a fresh run
    #[instrument(skip(self))]
    pub async fn clear_destination(&self) -> Result<()> {
        warn!("Clearing every destination table");
        self.storage.truncate_all().await
    }

    /// Derive corrections from the legacy values and merge them into the
    /// map at `path`. Existing entries are kept. Returns the merged map and
    /// how many entries were added.
    #[instrument(skip(self))]
    pub async fn generate_corrections(&self, path: &Path) -> Result<(CorrectionMap, usize)> {
        let records = self.source.fetch_records().await?;
        let samples = records.iter().flat_map(|r| {
            [
                (Category::Conductor, r.conductor.as_str()),
                (Category::Orchestra, r.orchestra.as_str()),
                (Category::Composer, r.composer.as_str()),
                (Category::Work, r.work.as_str()),
                (Category::Soloist, r.soloist.as_str()),
                (Category::Venue, r.venue.as_str()),
            ]
        });
        let generated = CorrectionMap::generate(samples);

        let mut map = if path.exists() {
            CorrectionMap::load(path)
        } else {
            CorrectionMap::default()
        };
        let added = map.merge_generated(generated);
        map.save(path)?;

        info!(path = %path.display(), added, total = map.len(), "Correction map written");
        Ok((map, added))
    }
}
