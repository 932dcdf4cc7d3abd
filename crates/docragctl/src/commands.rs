//! Subcommands

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use docragcache::{DocumentCacheStore, NewDocument};
use serde_json::json;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save a JSON array of {id, workId, content} documents
    Import {
        /// Path to the document list
        file: PathBuf,
    },

    /// Print cached documents as JSON
    List {
        /// Only documents of this processing job
        #[arg(long)]
        work_id: Option<String>,
    },

    /// Mark documents as recently used
    Touch {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print whether the cache should be refreshed
    NeedsSync,

    /// Print size, staleness and counters
    Info,

    /// Rewrite the store so it only holds live records
    Compact,
}

pub async fn run<W: Write>(cache: &DocumentCacheStore, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Import { file } => {
            let raw = fs::read_to_string(&file)
                .context(format!("Failed to read document list: {:?}", file))?;
            let documents: Vec<NewDocument> =
                serde_json::from_str(&raw).context("Failed to parse document list")?;
            let count = documents.len();

            cache
                .save_all(documents)
                .await
                .context("Failed to save documents")?;

            info!("Imported {} documents from {:?}", count, file);
            writeln!(out, "Imported {} documents", count)?;
        }
        Command::List { work_id } => {
            let mut documents = match work_id {
                Some(work_id) => cache.get_by_work_id(&work_id).await,
                None => cache.get_all().await,
            };
            documents.sort_by(|a, b| a.id.cmp(&b.id));

            writeln!(out, "{}", serde_json::to_string_pretty(&documents)?)?;
        }
        Command::Touch { ids } => {
            let count = ids.len();
            cache.touch(ids).await;
            writeln!(out, "Touched {} ids", count)?;
        }
        Command::NeedsSync => {
            writeln!(out, "{}", cache.needs_sync().await)?;
        }
        Command::Info => {
            let size = cache.size_info().await;
            let report = json!({
                "open": cache.is_open(),
                "totalDocuments": size.count,
                "totalSize": size.total_size_bytes,
                "totalSizeMB": format!("{:.2}", size.total_size_mb()),
                "needsSync": cache.needs_sync().await,
                "stats": cache.stats().snapshot(),
            });

            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        Command::Compact => {
            cache.compact().await.context("Failed to compact cache")?;
            writeln!(out, "Compacted")?;
        }
    }

    Ok(())
}
