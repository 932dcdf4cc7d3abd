//! # docragcache
//!
//! Local document cache for the DocumentRAG front end.
//!
//! ## Architecture
//! - **Storage**: `docragdb` log-structured store, one transaction per call
//! - **Eviction**: halve the least recently used records once the store is
//!   over half of `max_documents`; evict further if the size cap demands it
//! - **Staleness**: `needs_sync` compares the last full save to `stale_after`
//! - **Degradation**: read-path calls never fail, the backend is canonical

#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod document;
mod error;
mod lru;
mod stats;

pub use cache::{DocumentCacheStore, SizeInfo, LAST_SYNC_KEY};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DEFAULT_MAX_DOCUMENTS, DEFAULT_MAX_TOTAL_SIZE, DEFAULT_STALE_AFTER_HOURS};
pub use docragdb::DocumentRecord;
pub use document::{content_size, NewDocument};
pub use error::{CacheError, Result};
pub use stats::{CacheStats, StatsSnapshot};
