//! # docragdb
//!
//! Embedded document store backing the DocumentRAG local cache.
//!
//! ## Model
//! - Two tables: `documents` (key `id`) and `metadata` (key `key`)
//! - Secondary indices on `workId` and `lastAccessed`
//! - Append-only log, one frame per atomic write batch
//! - Single writer at a time, readers never touch the disk

#![warn(missing_docs)]

mod error;
mod parser;
mod record;
mod storage;
mod tables;

pub use error::{Error, Result};
pub use record::{DocumentRecord, Op, SyncMetadata, WriteBatch};
pub use storage::DocStore;
pub use tables::Tables;
