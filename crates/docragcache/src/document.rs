//! Documents as received from the backend

use serde::{Deserialize, Serialize};

/// A document to cache, before the cache stamps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    /// Unique key
    pub id: String,
    /// Processing job the document belongs to
    pub work_id: String,
    /// Opaque payload
    pub content: String,
}

impl NewDocument {
    /// Create a document
    pub fn new(
        id: impl Into<String>,
        work_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            work_id: work_id.into(),
            content: content.into(),
        }
    }

    /// Size accounted against the cache limit
    pub fn size_bytes(&self) -> u64 {
        content_size(&self.content)
    }
}

/// Byte length of `content` serialized as a JSON string
pub fn content_size(content: &str) -> u64 {
    serde_json::to_string(content)
        .map(|s| s.len() as u64)
        .unwrap_or(content.len() as u64)
}
