//! Storage engine implementation
//!
//! File layout:
//! - `documents.drag`: header followed by one frame per committed batch
//! - `documents.drag.compact`: scratch file while compacting, renamed over
//!   the log when complete
//!
//! The log is replayed into [`Tables`] on open. A frame only reaches the
//! in-memory tables after it has been written and synced, so a crash leaves
//! at most one torn frame at the tail, which is dropped on the next open.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_frame, parse_frame, parse_header, FORMAT_VERSION, HEADER_LEN,
};
use crate::record::{DocumentRecord, SyncMetadata, WriteBatch};
use crate::tables::Tables;

const LOG_FILE: &str = "documents.drag";
const COMPACT_FILE: &str = "documents.drag.compact";

/// Frames accumulated before the log is rewritten
const COMPACT_AFTER_FRAMES: u64 = 256;

/// Logs below this size are never rewritten for growth alone
const COMPACT_MIN_BYTES: u64 = 1024 * 1024;

/// Operations per frame when writing a compacted log
const SNAPSHOT_CHUNK: usize = 512;

struct LogFile {
    file: File,
    len: u64,
    frames_since_compaction: u64,
    /// Length right after the last rewrite; 0 when unknown
    compacted_len: u64,
}

impl LogFile {
    /// The log has grown to twice its compacted size, or has too many frames
    fn needs_compaction(&self) -> bool {
        self.frames_since_compaction >= COMPACT_AFTER_FRAMES
            || (self.len > COMPACT_MIN_BYTES && self.len > self.compacted_len.saturating_mul(2))
    }

    /// Switch writes to a freshly renamed log, then make the rename durable
    fn replace(&mut self, file: File, len: u64, dir: &Path) -> Result<()> {
        self.file = file;
        self.len = len;
        self.compacted_len = len;
        self.frames_since_compaction = 0;
        sync_dir(dir)
    }

    fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        if let Err(e) = self
            .file
            .write_all(frame)
            .and_then(|_| self.file.sync_data())
        {
            // Drop whatever part of the frame made it to disk
            let _ = self.file.set_len(self.len);
            return Err(e.into());
        }

        self.len += frame.len() as u64;
        self.frames_since_compaction += 1;
        Ok(())
    }
}

/// DocStore is the main database handle
pub struct DocStore {
    /// Path to the database directory
    path: PathBuf,

    /// Log file; holding this lock serializes writers
    log: Mutex<LogFile>,

    /// Tables rebuilt from the log
    tables: RwLock<Tables>,

    /// Is the database closed?
    closed: RwLock<bool>,
}

impl DocStore {
    /// Open or create a database at the given path
    ///
    /// # Arguments
    /// * `path` - Directory path for the database files
    ///
    /// # Returns
    /// * `Result<DocStore>` - Database handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let log_path = path.join(LOG_FILE);

        // Left behind by a compaction that never reached its rename
        let scratch = path.join(COMPACT_FILE);
        if scratch.exists() {
            fs::remove_file(&scratch)?;
        }

        let (log, tables) = if log_path.exists() {
            Self::open_existing(&log_path)?
        } else {
            Self::create_new(&log_path)?
        };

        debug!(
            path = %path.display(),
            documents = tables.len(),
            log_bytes = log.len,
            "docragdb opened"
        );

        Ok(DocStore {
            path: path.to_path_buf(),
            log: Mutex::new(log),
            tables: RwLock::new(tables),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(log_path: &Path) -> Result<(LogFile, Tables)> {
        let file = OpenOptions::new().read(true).write(true).open(log_path)?;

        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN as u64 {
            return Err(Error::Parse("File too short for header".to_string()));
        }

        // SAFETY: the map is dropped before this handle is written to, and
        // nothing else writes the log while the store is being opened.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = parse_header(&mmap[..HEADER_LEN])?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported format version {}",
                header.version
            )));
        }

        let mut tables = Tables::default();
        let mut frames = 0u64;
        let mut valid = HEADER_LEN;
        let mut rest = &mmap[HEADER_LEN..];

        while !rest.is_empty() {
            let Ok((remaining, payload)) = parse_frame(rest) else {
                break;
            };
            let Ok(batch) = serde_json::from_slice::<WriteBatch>(payload) else {
                break;
            };

            tables.apply_batch(batch);
            valid += rest.len() - remaining.len();
            rest = remaining;
            frames += 1;
        }
        drop(mmap);

        let valid = valid as u64;
        if valid < file_len {
            warn!(
                path = %log_path.display(),
                discarded_bytes = file_len - valid,
                "Discarding torn tail of document log"
            );
            file.set_len(valid)?;
            file.sync_all()?;
        }

        Ok((
            LogFile {
                file,
                len: valid,
                frames_since_compaction: frames,
                compacted_len: 0,
            },
            tables,
        ))
    }

    fn create_new(log_path: &Path) -> Result<(LogFile, Tables)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(log_path)?;

        let header = create_header(FORMAT_VERSION);
        file.write_all(&header)?;
        file.sync_all()?;

        Ok((
            LogFile {
                file,
                len: header.len() as u64,
                frames_since_compaction: 0,
                compacted_len: header.len() as u64,
            },
            Tables::default(),
        ))
    }

    /// Atomically apply a write batch
    ///
    /// The batch is durable when this returns `Ok`. An empty batch is a no-op.
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.update(|_, pending: &mut WriteBatch| {
            *pending = batch;
            Ok::<(), Error>(())
        })
    }

    /// Read-modify-write transaction
    ///
    /// `f` sees a consistent view of the tables and queues mutations into the
    /// batch it is given. Writers are serialized for the whole call, so the
    /// view cannot change between `f` and the commit. If `f` fails nothing is
    /// written. Once the log has outgrown its live rows it is rewritten
    /// before this returns.
    pub fn update<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Tables, &mut WriteBatch) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut log = self.log.lock();
        if *self.closed.read() {
            return Err(Error::Closed.into());
        }

        let mut batch = WriteBatch::new();
        let output = {
            let tables = self.tables.read();
            f(&*tables, &mut batch)?
        };

        if batch.is_empty() {
            return Ok(output);
        }

        let payload = serde_json::to_vec(&batch).map_err(Error::from)?;
        let frame = encode_frame(&payload)?;
        log.append(&frame)?;

        self.tables.write().apply_batch(batch);

        if log.needs_compaction() {
            // The batch is already durable in the old log
            if let Err(e) = self.compact_locked(&mut log) {
                warn!(error = %e, "Failed to compact document log");
            }
        }

        Ok(output)
    }

    /// Run a read-only closure against the tables
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> T,
    {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        let tables = self.tables.read();
        Ok(f(&*tables))
    }

    /// Get a document by id
    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.read(|t| t.get_document(id).cloned())
    }

    /// Get every document, in unspecified order
    pub fn documents(&self) -> Result<Vec<DocumentRecord>> {
        self.read(|t| t.documents().cloned().collect())
    }

    /// Get the documents of one processing job
    pub fn documents_by_work_id(&self, work_id: &str) -> Result<Vec<DocumentRecord>> {
        self.read(|t| {
            t.documents_by_work_id(work_id)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Get a metadata row
    pub fn metadata(&self, key: &str) -> Result<Option<SyncMetadata>> {
        self.read(|t| t.metadata(key).cloned())
    }

    /// Get the number of documents
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Check if the database holds no documents
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Sum of document sizes
    pub fn total_size(&self) -> u64 {
        self.tables.read().total_size()
    }

    /// Current log file size in bytes
    pub fn log_size(&self) -> u64 {
        self.log.lock().len
    }

    /// Directory holding the database files
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log so it only holds live rows
    pub fn compact(&self) -> Result<()> {
        let mut log = self.log.lock();
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        self.compact_locked(&mut log)
    }

    fn compact_locked(&self, log: &mut LogFile) -> Result<()> {
        let scratch_path = self.path.join(COMPACT_FILE);
        let log_path = self.path.join(LOG_FILE);

        let mut scratch = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&scratch_path)?;

        let header = create_header(FORMAT_VERSION);
        scratch.write_all(&header)?;
        let mut len = header.len() as u64;

        {
            let tables = self.tables.read();

            let mut batch = WriteBatch::new();
            for row in tables.metadata_rows() {
                batch.put_metadata(row.clone());
            }

            for record in tables.oldest_documents() {
                if batch.len() >= SNAPSHOT_CHUNK {
                    len += write_snapshot_frame(&mut scratch, &batch)?;
                    batch = WriteBatch::new();
                }
                batch.put_document(record.clone());
            }

            if !batch.is_empty() {
                len += write_snapshot_frame(&mut scratch, &batch)?;
            }
        }

        scratch.sync_all()?;
        fs::rename(&scratch_path, &log_path)?;

        debug!(before = log.len, after = len, "Compacted document log");

        log.replace(scratch, len, &self.path)
    }

    /// Close the database and fsync all changes
    pub fn close(&self) -> Result<()> {
        let mut log = self.log.lock();
        if *self.closed.read() {
            return Ok(());
        }

        if log.needs_compaction() {
            self.compact_locked(&mut log)?;
        }
        log.file.sync_all()?;

        *self.closed.write() = true;

        Ok(())
    }

    /// Check whether the database has been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

impl Drop for DocStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn write_snapshot_frame(file: &mut File, batch: &WriteBatch) -> Result<u64> {
    let frame = encode_frame(&serde_json::to_vec(batch)?)?;
    file.write_all(&frame)?;
    Ok(frame.len() as u64)
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn record(id: &str, work_id: &str, minute: i64) -> DocumentRecord {
        let content = format!("page text for {}", id);
        DocumentRecord {
            id: id.to_string(),
            work_id: work_id.to_string(),
            size_bytes: content.len() as u64,
            content,
            saved_at: at(minute),
            last_accessed: at(minute),
        }
    }

    fn put_all(db: &DocStore, records: Vec<DocumentRecord>) {
        let mut batch = WriteBatch::new();
        for r in records {
            batch.put_document(r);
        }
        db.commit(batch).unwrap();
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        assert_eq!(db.len(), 0);
        assert!(db.is_empty());
        assert_eq!(db.log_size(), HEADER_LEN as u64);

        db.close().unwrap();

        // Reopen
        let db = DocStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn test_commit_and_get() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        put_all(&db, vec![record("a", "w1", 0), record("b", "w1", 1)]);

        assert_eq!(db.len(), 2);
        assert_eq!(db.get_document("a").unwrap().unwrap().work_id, "w1");
        assert!(db.get_document("zzz").unwrap().is_none());
        assert_eq!(db.documents_by_work_id("w1").unwrap().len(), 2);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let db = DocStore::open(dir.path()).unwrap();
            put_all(&db, vec![record("a", "w1", 0), record("b", "w2", 1)]);

            let mut batch = WriteBatch::new();
            batch.delete_document("a").put_metadata(SyncMetadata {
                key: "lastSync".to_string(),
                value: at(2),
                total_documents: 2,
            });
            db.commit(batch).unwrap();
            db.close().unwrap();
        }

        {
            let db = DocStore::open(dir.path()).unwrap();
            assert_eq!(db.len(), 1);
            assert!(db.get_document("a").unwrap().is_none());
            assert_eq!(db.get_document("b").unwrap().unwrap(), record("b", "w2", 1));
            assert_eq!(db.metadata("lastSync").unwrap().unwrap().value, at(2));
        }
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();

        let committed_len = {
            let db = DocStore::open(dir.path()).unwrap();
            put_all(&db, vec![record("a", "w1", 0)]);
            db.log_size()
        };

        // Simulate a crash halfway through the next frame
        {
            let payload = serde_json::to_vec(&{
                let mut b = WriteBatch::new();
                b.put_document(record("b", "w1", 1));
                b
            })
            .unwrap();
            let frame = encode_frame(&payload).unwrap();

            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            file.write_all(&frame[..frame.len() / 2]).unwrap();
        }

        let db = DocStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.get_document("b").unwrap().is_none());
        assert_eq!(db.log_size(), committed_len);

        // The log keeps working after recovery
        put_all(&db, vec![record("c", "w1", 2)]);
        db.close().unwrap();

        let db = DocStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn test_invalid_magic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOG_FILE), b"NOTADRAGFILE-----").unwrap();

        assert!(matches!(DocStore::open(dir.path()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_update_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();
        let before = db.log_size();

        let result: Result<()> = db.update(|_, batch| {
            batch.put_document(record("a", "w1", 0));
            Err(Error::Parse("rejected".to_string()))
        });

        assert!(result.is_err());
        assert!(db.is_empty());
        assert_eq!(db.log_size(), before);
    }

    #[test]
    fn test_update_sees_current_rows() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();
        put_all(&db, vec![record("a", "w1", 0), record("b", "w1", 1)]);

        let evicted: Result<Vec<String>> = db.update(|tables, batch| {
            let oldest: Vec<String> = tables.oldest_documents().take(1).map(|r| r.id.clone()).collect();
            for id in &oldest {
                batch.delete_document(id.clone());
            }
            Ok(oldest)
        });

        assert_eq!(evicted.unwrap(), vec!["a".to_string()]);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_compaction() {
        let dir = TempDir::new().unwrap();

        {
            let db = DocStore::open(dir.path()).unwrap();
            for i in 0..20 {
                put_all(&db, vec![record("same", "w1", i)]);
            }
            put_all(&db, vec![record("other", "w2", 30)]);

            let before = db.log_size();
            db.compact().unwrap();
            assert!(db.log_size() < before);

            // Writes after compaction land in the new file
            put_all(&db, vec![record("late", "w2", 31)]);
            db.close().unwrap();
        }

        let db = DocStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.get_document("same").unwrap().unwrap().last_accessed, at(19));
        assert!(!dir.path().join(COMPACT_FILE).exists());
    }

    #[test]
    fn test_compacts_after_many_frames() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        for i in 0..COMPACT_AFTER_FRAMES as i64 - 1 {
            put_all(&db, vec![record("same", "w1", i)]);
        }
        let before = db.log_size();

        put_all(&db, vec![record("same", "w1", 1000)]);
        assert!(db.log_size() < before);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_close_compacts_when_due() {
        let dir = TempDir::new().unwrap();
        DocStore::open(dir.path()).unwrap().close().unwrap();

        // Frames written by an older process that never compacted
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            for i in 0..COMPACT_AFTER_FRAMES as i64 {
                let mut batch = WriteBatch::new();
                batch.put_document(record("same", "w1", i));
                file.write_all(&encode_frame(&serde_json::to_vec(&batch).unwrap()).unwrap())
                    .unwrap();
            }
        }

        let db = DocStore::open(dir.path()).unwrap();
        let before = db.log_size();
        db.close().unwrap();

        let size = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        assert!(size < before);
    }

    #[test]
    fn test_log_stays_bounded_without_close() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        let content = "x".repeat(100_000);
        for round in 0..100 {
            let mut batch = WriteBatch::new();
            for i in 0..10 {
                batch.put_document(DocumentRecord {
                    id: format!("doc-{}", i),
                    work_id: "w1".to_string(),
                    content: content.clone(),
                    saved_at: at(round),
                    last_accessed: at(round),
                    size_bytes: content.len() as u64 + 2,
                });
            }
            db.commit(batch).unwrap();

            // Live rows are about 1 MB; one batch frame is about the same
            assert!(db.log_size() < 4 * db.total_size() + COMPACT_MIN_BYTES);
        }

        let on_disk = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        assert_eq!(on_disk, db.log_size());
        drop(db);

        let db = DocStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 10);
        assert_eq!(db.get_document("doc-3").unwrap().unwrap().last_accessed, at(99));
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_switches_file_before_dir_sync() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = DocStore::create_new(&dir.path().join(LOG_FILE)).unwrap();
        let (fresh, _) = DocStore::create_new(&dir.path().join(COMPACT_FILE)).unwrap();
        let fresh_len = fresh.len;

        // Directory sync fails, but later appends must still land in the new file
        let result = log.replace(fresh.file, fresh_len, &dir.path().join("missing"));
        assert!(result.is_err());
        assert_eq!(log.len, fresh_len);
        assert_eq!(log.frames_since_compaction, 0);

        log.append(b"frame").unwrap();
        let size = fs::metadata(dir.path().join(COMPACT_FILE)).unwrap().len();
        assert_eq!(size, fresh_len + 5);
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        db.close().unwrap();
        db.close().unwrap(); // Should not error
        assert!(db.is_closed());
    }

    #[test]
    fn test_operations_after_close() {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        db.close().unwrap();

        assert!(matches!(db.commit(WriteBatch::new()), Err(Error::Closed)));
        assert!(matches!(db.documents(), Err(Error::Closed)));
        assert!(matches!(db.compact(), Err(Error::Closed)));
    }
}
