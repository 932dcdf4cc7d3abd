//! Row types and write batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `documents` table, keyed by `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    /// Primary key
    pub id: String,
    /// Processing job the document belongs to (indexed)
    pub work_id: String,
    /// Opaque document payload
    pub content: String,
    /// When the row was first inserted
    pub saved_at: DateTime<Utc>,
    /// Last save or touch (indexed, drives eviction)
    pub last_accessed: DateTime<Utc>,
    /// Serialized size of `content`
    pub size_bytes: u64,
}

/// A row of the `metadata` table, keyed by `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Primary key
    pub key: String,
    /// Timestamp of the recorded event
    pub value: DateTime<Utc>,
    /// Document count at that time
    pub total_documents: usize,
}

/// A single table mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Insert or overwrite a document
    PutDocument {
        /// Row to store
        record: DocumentRecord,
    },
    /// Delete a document if present
    DeleteDocument {
        /// Primary key to delete
        id: String,
    },
    /// Insert or overwrite a metadata row
    PutMetadata {
        /// Row to store
        record: SyncMetadata,
    },
}

/// An ordered set of mutations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a document upsert
    pub fn put_document(&mut self, record: DocumentRecord) -> &mut Self {
        self.ops.push(Op::PutDocument { record });
        self
    }

    /// Queue a document delete
    pub fn delete_document(&mut self, id: impl Into<String>) -> &mut Self {
        self.ops.push(Op::DeleteDocument { id: id.into() });
        self
    }

    /// Queue a metadata upsert
    pub fn put_metadata(&mut self, record: SyncMetadata) -> &mut Self {
        self.ops.push(Op::PutMetadata { record });
        self
    }

    /// Queued operations, in order
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}
