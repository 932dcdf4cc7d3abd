//! In-memory tables and secondary indices rebuilt from the log

use std::collections::{BTreeSet, HashMap};

use ahash::RandomState;
use chrono::{DateTime, Utc};

use crate::record::{DocumentRecord, Op, SyncMetadata, WriteBatch};

type Map<K, V> = HashMap<K, V, RandomState>;

/// Live contents of the `documents` and `metadata` tables
///
/// Readers get a `&Tables` through [`crate::DocStore::read`] or inside
/// [`crate::DocStore::update`]; mutation only happens by applying committed
/// batches.
#[derive(Debug, Default)]
pub struct Tables {
    documents: Map<String, DocumentRecord>,
    by_work_id: Map<String, BTreeSet<String>>,
    by_last_accessed: BTreeSet<(DateTime<Utc>, String)>,
    metadata: Map<String, SyncMetadata>,
    total_size: u64,
}

impl Tables {
    /// Look up a document by primary key
    pub fn get_document(&self, id: &str) -> Option<&DocumentRecord> {
        self.documents.get(id)
    }

    /// Iterate over all documents in unspecified order
    pub fn documents(&self) -> impl Iterator<Item = &DocumentRecord> + '_ {
        self.documents.values()
    }

    /// Documents of one processing job, ordered by id
    pub fn documents_by_work_id(&self, work_id: &str) -> Vec<&DocumentRecord> {
        self.by_work_id
            .get(work_id)
            .map(|ids| ids.iter().filter_map(|id| self.documents.get(id)).collect())
            .unwrap_or_default()
    }

    /// Iterate over documents from least to most recently accessed
    ///
    /// Ties on `last_accessed` are broken by ascending id.
    pub fn oldest_documents(&self) -> impl Iterator<Item = &DocumentRecord> + '_ {
        self.by_last_accessed
            .iter()
            .filter_map(|(_, id)| self.documents.get(id))
    }

    /// Look up a metadata row
    pub fn metadata(&self, key: &str) -> Option<&SyncMetadata> {
        self.metadata.get(key)
    }

    /// Iterate over all metadata rows
    pub fn metadata_rows(&self) -> impl Iterator<Item = &SyncMetadata> + '_ {
        self.metadata.values()
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if there are no documents
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Sum of `size_bytes` over all documents
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub(crate) fn apply_batch(&mut self, batch: WriteBatch) {
        for op in batch.into_ops() {
            self.apply(op);
        }
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::PutDocument { record } => self.insert_document(record),
            Op::DeleteDocument { id } => {
                self.remove_document(&id);
            }
            Op::PutMetadata { record } => {
                self.metadata.insert(record.key.clone(), record);
            }
        }
    }

    fn insert_document(&mut self, record: DocumentRecord) {
        self.remove_document(&record.id);

        self.by_work_id
            .entry(record.work_id.clone())
            .or_default()
            .insert(record.id.clone());
        self.by_last_accessed
            .insert((record.last_accessed, record.id.clone()));
        self.total_size += record.size_bytes;
        self.documents.insert(record.id.clone(), record);
    }

    fn remove_document(&mut self, id: &str) -> Option<DocumentRecord> {
        let record = self.documents.remove(id)?;

        if let Some(ids) = self.by_work_id.get_mut(&record.work_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_work_id.remove(&record.work_id);
            }
        }
        self.by_last_accessed
            .remove(&(record.last_accessed, record.id.clone()));
        self.total_size = self.total_size.saturating_sub(record.size_bytes);

        Some(record)
    }
}
