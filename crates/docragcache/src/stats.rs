//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for cache activity since the cache was created
#[derive(Debug, Default)]
pub struct CacheStats {
    saves: AtomicU64,
    documents_written: AtomicU64,
    evictions: AtomicU64,
    touches: AtomicU64,
    quota_rejections: AtomicU64,
    degraded_reads: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Successful `save_all` calls
    pub saves: u64,
    /// Records written by those calls
    pub documents_written: u64,
    /// Records removed by eviction
    pub evictions: u64,
    /// Records whose access time was refreshed
    pub touches: u64,
    /// Batches rejected for size
    pub quota_rejections: u64,
    /// Reads that fell back to an empty or fail-open answer
    pub degraded_reads: u64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful save of `documents` records
    pub fn record_save(&self, documents: usize) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.documents_written
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    /// Record evicted records
    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record touched records
    pub fn record_touches(&self, count: usize) {
        self.touches.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a batch rejected for size
    pub fn record_quota_rejection(&self) {
        self.quota_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that degraded instead of failing
    pub fn record_degraded_read(&self) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total successful saves
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Get total records written
    pub fn documents_written(&self) -> u64 {
        self.documents_written.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get total touched records
    pub fn touches(&self) -> u64 {
        self.touches.load(Ordering::Relaxed)
    }

    /// Get total quota rejections
    pub fn quota_rejections(&self) -> u64 {
        self.quota_rejections.load(Ordering::Relaxed)
    }

    /// Get total degraded reads
    pub fn degraded_reads(&self) -> u64 {
        self.degraded_reads.load(Ordering::Relaxed)
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            saves: self.saves(),
            documents_written: self.documents_written(),
            evictions: self.evictions(),
            touches: self.touches(),
            quota_rejections: self.quota_rejections(),
            degraded_reads: self.degraded_reads(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.saves.store(0, Ordering::Relaxed);
        self.documents_written.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.touches.store(0, Ordering::Relaxed);
        self.quota_rejections.store(0, Ordering::Relaxed);
        self.degraded_reads.store(0, Ordering::Relaxed);
    }
}
