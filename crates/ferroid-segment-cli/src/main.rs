#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    io::{BufWriter, Write},
    sync::Arc,
};

use clap::Parser;
use ferroid_segment::{Allocator, SegmentStore, SqliteStore};
use mimalloc::MiMalloc;

use crate::{
    config::{CliArgs, CliConfig, Command},
    telemetry::init_tracing,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    // A missing `.env` is fine; only explicit settings matter.
    let _ = dotenvy::dotenv();

    let args = CliArgs::try_parse()?;
    let config = CliConfig::try_from(args)?;

    init_tracing();
    log_startup_info(&config);

    let store = Arc::new(SqliteStore::open_with_timeout(
        &config.database,
        config.busy_timeout,
    )?);

    match config.command.clone() {
        Command::List => list_tags(&*store),
        Command::Draw { tag, count } => draw(store, &config, &tag, count),
    }
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting with full config: {:#?}", config);
    } else {
        tracing::debug!(
            database = %config.database.display(),
            step = config.allocator.default_step,
            "Starting"
        );
    }
}

/// Prints `tag<TAB>max_id` for every row in the allocation table.
fn list_tags(store: &dyn SegmentStore) -> anyhow::Result<()> {
    let mut out = BufWriter::new(std::io::stdout().lock());
    for tag in store.list_tags()? {
        let max_id = store.max_id(&tag)?.unwrap_or_default();
        writeln!(out, "{tag}\t{max_id}")?;
    }
    out.flush()?;
    Ok(())
}

fn draw(
    store: Arc<SqliteStore>,
    config: &CliConfig,
    tag: &str,
    count: usize,
) -> anyhow::Result<()> {
    // One-shot process: the tag list is loaded once at build time.
    let allocator = Allocator::builder(store)
        .config(config.allocator.clone())
        .background_refresh(false)
        .build()?;

    let result = write_ids(&allocator, config, tag, count);

    for view in allocator.buffer_views() {
        tracing::info!(
            tag = %view.tag,
            current = view.current_index,
            next_ready = view.next_ready,
            step = view.step,
            "Buffer state: {:?}",
            view.segments
        );
    }
    allocator.shutdown();
    result
}

fn write_ids(
    allocator: &Allocator,
    config: &CliConfig,
    tag: &str,
    count: usize,
) -> anyhow::Result<()> {
    let mut out = BufWriter::new(std::io::stdout().lock());
    for _ in 0..count {
        let id = allocator.next_id_blocking(tag, config.retry)?;
        writeln!(out, "{id}")?;
    }
    out.flush()?;
    Ok(())
}
