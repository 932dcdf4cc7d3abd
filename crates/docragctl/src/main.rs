//! docragctl - inspect and feed the DocumentRAG local document cache

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docragcache::{
    CacheConfig, DocumentCacheStore, DEFAULT_MAX_DOCUMENTS, DEFAULT_MAX_TOTAL_SIZE,
    DEFAULT_STALE_AFTER_HOURS,
};
use tracing::{info, warn};

use crate::commands::Command;

/// Largest staleness window chrono can represent, in hours
const MAX_STALE_AFTER_HOURS: i64 = i64::MAX / 1000 / 3600;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Soft cap on cached documents
    #[arg(long, default_value_t = DEFAULT_MAX_DOCUMENTS)]
    max_documents: usize,

    /// Cap on total cached bytes
    #[arg(long, default_value_t = DEFAULT_MAX_TOTAL_SIZE)]
    max_total_size: u64,

    /// Hours after the last import before a re-sync is due
    #[arg(
        long,
        default_value_t = DEFAULT_STALE_AFTER_HOURS,
        value_parser = clap::value_parser!(i64).range(0..=MAX_STALE_AFTER_HOURS)
    )]
    stale_after_hours: i64,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn config(&self) -> Result<CacheConfig> {
        let stale_after = chrono::Duration::try_hours(self.stale_after_hours)
            .context(format!("Staleness window out of range: {}h", self.stale_after_hours))?;

        Ok(CacheConfig::default()
            .with_max_documents(self.max_documents)
            .with_max_total_size(self.max_total_size)
            .with_stale_after(stale_after))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config()?;

    info!("docragctl v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", args.data.display());
    info!(
        "Limits: {} documents, {:.2} MB, stale after {}h",
        config.max_documents,
        config.max_total_size as f64 / 1024.0 / 1024.0,
        args.stale_after_hours
    );

    let cache = DocumentCacheStore::new(&args.data, config);
    if let Err(e) = cache.open().await {
        // Reads still answer (empty / needs sync); writes will fail
        warn!("Running without cache: {}", e);
    }

    let mut stdout = std::io::stdout();
    let outcome = commands::run(&cache, args.command, &mut stdout).await;

    finish(outcome, cache.close().await)
}

/// The command's own error wins over a close failure
fn finish<E>(outcome: Result<()>, closed: std::result::Result<(), E>) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match outcome {
        Ok(()) => closed.context("Failed to close cache"),
        Err(e) => {
            if let Err(close_err) = closed {
                warn!("Failed to close cache: {}", close_err);
            }
            Err(e)
        }
    }
}
