//! DocumentCacheStore: bounded LRU document cache over DocStore

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::RandomState;
use docragdb::{DocStore, DocumentRecord, SyncMetadata};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::document::NewDocument;
use crate::error::{CacheError, Result};
use crate::lru::{EvictionPlan, EvictionPolicy, IncomingSizes};
use crate::stats::CacheStats;

/// Metadata key of the last successful full save
pub const LAST_SYNC_KEY: &str = "lastSync";

/// Aggregate size of the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeInfo {
    /// Number of cached records
    pub count: usize,
    /// Sum of `size_bytes` over all records
    pub total_size_bytes: u64,
}

impl SizeInfo {
    /// Total size in megabytes
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Durable, size-bounded, LRU-evicting document cache
///
/// Write operations (`open`, `save_all`) report typed errors. Read-path
/// operations never fail: they degrade to an empty answer (`get_all`,
/// `size_info`), do nothing (`touch`) or fail open (`needs_sync` returns
/// true), since the backend always holds the canonical copy.
pub struct DocumentCacheStore {
    /// Database directory
    path: PathBuf,

    /// Limits
    config: CacheConfig,

    /// Time source for stamps and staleness
    clock: Arc<dyn Clock>,

    /// Underlying store, set once by `open`
    store: OnceCell<Arc<DocStore>>,

    /// Cache statistics
    stats: Arc<CacheStats>,
}

impl DocumentCacheStore {
    /// Create a cache rooted at `path` using the wall clock
    ///
    /// Nothing touches the disk until [`open`](Self::open).
    pub fn new<P: AsRef<Path>>(path: P, config: CacheConfig) -> Self {
        Self::with_clock(path, config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source
    pub fn with_clock<P: AsRef<Path>>(path: P, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            clock,
            store: OnceCell::new(),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Open the underlying store, creating it on first use
    ///
    /// Safe to call more than once and from concurrent tasks; all callers
    /// share a single open.
    pub async fn open(&self) -> Result<()> {
        self.store
            .get_or_try_init(|| async {
                info!(path = %self.path.display(), "Opening document cache");

                let path = self.path.clone();
                let store = tokio::task::spawn_blocking(move || DocStore::open(path))
                    .await
                    .map_err(|e| CacheError::StoreUnavailable(join_error(e)))?
                    .map_err(|e| {
                        warn!(error = %e, "Document cache unavailable");
                        CacheError::StoreUnavailable(e)
                    })?;

                info!(documents = store.len(), "Document cache opened");
                Ok::<_, CacheError>(Arc::new(store))
            })
            .await?;

        Ok(())
    }

    /// Check whether `open` has succeeded
    pub fn is_open(&self) -> bool {
        self.store.initialized()
    }

    /// Replace the cache contents with a freshly fetched batch
    ///
    /// Rejects the whole batch with [`CacheError::QuotaExceeded`] when its
    /// serialized size is over `max_total_size`. Otherwise evicts, upserts
    /// every document and records the sync time in a single transaction.
    /// Duplicate ids in `documents` collapse to the last occurrence.
    pub async fn save_all(&self, documents: Vec<NewDocument>) -> Result<()> {
        let total = documents.len();
        let documents = dedup_last_wins(documents);

        let batch_size: u64 = documents.iter().map(|(_, size)| size).sum();
        debug!(
            documents = total,
            size_mb = format_args!("{:.2}", batch_size as f64 / 1024.0 / 1024.0),
            "Saving document batch"
        );

        if batch_size > self.config.max_total_size {
            self.stats.record_quota_rejection();
            let err = CacheError::QuotaExceeded {
                size: batch_size,
                max: self.config.max_total_size,
            };
            warn!(error = %err, "Rejected document batch");
            return Err(err);
        }

        let now = self.clock.now();
        let policy = EvictionPolicy::new(self.config.max_documents, self.config.max_total_size);
        let written = documents.len();

        let (plan, stored_bytes) = self
            .run(move |store| {
                let plan = store.update(|tables, batch| {
                    let incoming: IncomingSizes<'_> = documents
                        .iter()
                        .map(|(doc, size)| (doc.id.as_str(), *size))
                        .collect();
                    let plan = policy.plan(tables.oldest_documents(), &incoming);
                    let evicted: HashSet<&str, RandomState> =
                        plan.ids.iter().map(String::as_str).collect();

                    for id in &plan.ids {
                        batch.delete_document(id.clone());
                    }

                    for (doc, size) in &documents {
                        let saved_at = tables
                            .get_document(&doc.id)
                            .filter(|existing| !evicted.contains(existing.id.as_str()))
                            .map(|existing| existing.saved_at)
                            .unwrap_or(now);

                        batch.put_document(DocumentRecord {
                            id: doc.id.clone(),
                            work_id: doc.work_id.clone(),
                            content: doc.content.clone(),
                            saved_at,
                            last_accessed: now.max(saved_at),
                            size_bytes: *size,
                        });
                    }

                    batch.put_metadata(SyncMetadata {
                        key: LAST_SYNC_KEY.to_string(),
                        value: now,
                        total_documents: total,
                    });

                    Ok::<_, CacheError>(plan)
                })?;

                Ok((plan, store.total_size()))
            })
            .await?;

        self.stats.record_save(written);
        self.log_eviction(&plan);
        info!(
            documents = written,
            cache_mb = format_args!("{:.2}", stored_bytes as f64 / 1024.0 / 1024.0),
            "Saved document batch"
        );

        Ok(())
    }

    /// Every cached record, in unspecified order
    ///
    /// Does not refresh access times. Empty if the store is empty or unusable.
    pub async fn get_all(&self) -> Vec<DocumentRecord> {
        match self.run(|store| Ok(store.documents()?)).await {
            Ok(documents) => {
                debug!(documents = documents.len(), "Read cached documents");
                documents
            }
            Err(e) => self.degraded(e, "read cached documents", Vec::new()),
        }
    }

    /// A single record, if cached
    pub async fn get(&self, id: &str) -> Option<DocumentRecord> {
        let id = id.to_string();
        match self.run(move |store| Ok(store.get_document(&id)?)).await {
            Ok(record) => record,
            Err(e) => self.degraded(e, "read cached document", None),
        }
    }

    /// Records of one processing job, ordered by id
    pub async fn get_by_work_id(&self, work_id: &str) -> Vec<DocumentRecord> {
        let work_id = work_id.to_string();
        match self
            .run(move |store| Ok(store.documents_by_work_id(&work_id)?))
            .await
        {
            Ok(documents) => documents,
            Err(e) => self.degraded(e, "read documents by work id", Vec::new()),
        }
    }

    /// Mark records as used now
    ///
    /// Unknown ids are skipped; the record may have been evicted since the
    /// caller read it. Failures are logged and otherwise ignored.
    pub async fn touch<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen: HashSet<String, RandomState> = HashSet::default();
        let ids: Vec<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return;
        }

        let now = self.clock.now();
        let result = self
            .run(move |store| {
                store.update(|tables, batch| {
                    let mut touched: usize = 0;
                    for id in &ids {
                        if let Some(existing) = tables.get_document(id) {
                            let mut record = existing.clone();
                            record.last_accessed = now.max(record.saved_at);
                            batch.put_document(record);
                            touched += 1;
                        }
                    }
                    Ok::<_, CacheError>(touched)
                })
            })
            .await;

        match result {
            Ok(touched) => {
                self.stats.record_touches(touched);
                debug!(touched, "Updated last access time");
            }
            Err(e) => warn!(error = %e, "Failed to update last access time"),
        }
    }

    /// Whether the cache should be refreshed from the backend
    ///
    /// True when there has been no full save yet, when the last one is older
    /// than `stale_after`, or when the store cannot be read.
    pub async fn needs_sync(&self) -> bool {
        let now = self.clock.now();
        let stale_after = self.config.stale_after;

        match self.run(|store| Ok(store.metadata(LAST_SYNC_KEY)?)).await {
            Ok(None) => {
                info!("Initial sync required");
                true
            }
            Ok(Some(last_sync)) => {
                let stale = now - last_sync.value > stale_after;
                debug!(
                    last_sync = %last_sync.value,
                    needs_sync = stale,
                    "Checked sync state"
                );
                stale
            }
            Err(e) => self.degraded(e, "check sync state", true),
        }
    }

    /// Record count and total size, recomputed from the records
    pub async fn size_info(&self) -> SizeInfo {
        let result = self
            .run(|store| {
                Ok(store.read(|tables| SizeInfo {
                    count: tables.len(),
                    total_size_bytes: tables.documents().map(|r| r.size_bytes).sum(),
                })?)
            })
            .await;

        match result {
            Ok(info) => info,
            Err(e) => self.degraded(e, "compute cache size", SizeInfo::default()),
        }
    }

    /// Rewrite the underlying log so it only holds live records
    pub async fn compact(&self) -> Result<()> {
        self.run(|store| Ok(store.compact()?)).await
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the configured limits
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Close the store and sync it to disk
    pub async fn close(self) -> Result<()> {
        match self.store.into_inner() {
            Some(store) => {
                tokio::task::spawn_blocking(move || store.close())
                    .await
                    .map_err(|e| CacheError::TransactionFailed(join_error(e)))??;
                info!("Document cache closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Run a store operation on the blocking pool
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DocStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self
            .store
            .get()
            .cloned()
            .ok_or(CacheError::StoreUnavailable(docragdb::Error::Closed))?;

        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| CacheError::TransactionFailed(join_error(e)))?
    }

    fn degraded<T>(&self, err: CacheError, action: &str, fallback: T) -> T {
        self.stats.record_degraded_read();
        warn!(error = %err, "Failed to {}, using fallback", action);
        fallback
    }

    fn log_eviction(&self, plan: &EvictionPlan) {
        if plan.is_empty() {
            return;
        }
        self.stats.record_evictions(plan.ids.len());
        info!(
            evicted = plan.ids.len(),
            by_count = plan.by_count,
            by_size = plan.by_size,
            "Evicted least recently used documents"
        );
    }
}

/// Keep the last occurrence of each id, in first-seen order, with sizes
fn dedup_last_wins(documents: Vec<NewDocument>) -> Vec<(NewDocument, u64)> {
    let mut slots: HashMap<String, usize, RandomState> = HashMap::default();
    let mut out: Vec<(NewDocument, u64)> = Vec::with_capacity(documents.len());

    for doc in documents {
        let size = doc.size_bytes();
        match slots.get(&doc.id) {
            Some(&slot) => out[slot] = (doc, size),
            None => {
                slots.insert(doc.id.clone(), out.len());
                out.push((doc, size));
            }
        }
    }

    out
}

fn join_error(err: tokio::task::JoinError) -> docragdb::Error {
    docragdb::Error::Io(io::Error::new(io::ErrorKind::Other, err))
}
