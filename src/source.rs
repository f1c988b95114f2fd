use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Document, LegacyRecord};

/// Read side of the legacy database
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Every legacy record, ordered by id
    async fn fetch_records(&self) -> Result<Vec<LegacyRecord>>;

    /// Every legacy document, ordered by id
    async fn fetch_documents(&self) -> Result<Vec<Document>>;
}

/// Fixed legacy data held in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pub records: Vec<LegacyRecord>,
    pub documents: Vec<Document>,
}

impl InMemorySource {
    pub fn new(records: Vec<LegacyRecord>, documents: Vec<Document>) -> Self {
        Self { records, documents }
    }
}

#[async_trait]
impl LegacySource for InMemorySource {
    async fn fetch_records(&self) -> Result<Vec<LegacyRecord>> {
        let mut records = self.records.clone();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn fetch_documents(&self) -> Result<Vec<Document>> {
        let mut documents = self.documents.clone();
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }
}
