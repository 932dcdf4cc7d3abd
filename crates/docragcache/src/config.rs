//! Cache limits

use chrono::Duration;

/// Default soft cap on cached documents
pub const DEFAULT_MAX_DOCUMENTS: usize = 1000;

/// Default cap on total serialized size (50 MB)
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 50 * 1024 * 1024;

/// Default age after which a re-sync is due
pub const DEFAULT_STALE_AFTER_HOURS: i64 = 24;

/// Limits fixed for the lifetime of a [`crate::DocumentCacheStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Soft cap on record count; eviction halves the store above half of it
    pub max_documents: usize,
    /// Hard cap on the summed `size_bytes` of all records
    pub max_total_size: u64,
    /// Age of the last full save after which `needs_sync` reports true
    pub stale_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_documents: DEFAULT_MAX_DOCUMENTS,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            stale_after: Duration::hours(DEFAULT_STALE_AFTER_HOURS),
        }
    }
}

impl CacheConfig {
    /// Set the document count cap
    pub fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    /// Set the total size cap in bytes
    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.max_total_size = max_total_size;
        self
    }

    /// Set the staleness threshold
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}
