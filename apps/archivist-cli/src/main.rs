//! Archivist
//!
//! Catalogs scanned photo batches and searches their OCR transcripts.
//!
//! # Usage
//!
//! ```bash
//! archivist index [BATCH]
//! archivist search <QUERY> [--batch BATCH]
//! archivist status [QUERY] [--batch BATCH]
//! archivist query <QUERY> [--limit N] [--batch BATCH]
//! archivist megadoc <QUERY> [--batch BATCH]
//! archivist prune [--batch BATCH]
//! ```
//!
//! # Configuration
//!
//! Later sources override earlier ones:
//! 1. Built-in defaults
//! 2. `config.toml` and `config.<RUST_ENV>.toml`, or the file given with `--config`
//! 3. Environment variables (`ARCHIVIST_*`, `__` separates sections)
//! 4. CLI flags

mod cli;
mod commands;

use anyhow::{Context as _, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use archivist_search::CacheError;
use archivist_text::TextError;
use cli::{Cli, Commands};
use commands::Context;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_consistency_fault(&e) => {
            eprintln!("Error: {e:#}");
            eprintln!("The search index no longer matches index.json. Rebuild it with `archivist index`.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let level = cli.log_level.as_deref().unwrap_or(ctx.settings.log.level.as_str());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Index { batch } => commands::index(&ctx, batch.as_deref()),
        Commands::Search { query, batch } => commands::search(&ctx, &query, batch.as_deref()),
        Commands::Status { query, batch } => commands::status(&ctx, query.as_deref(), batch.as_deref()),
        Commands::Query { query, limit, batch } => commands::query(&ctx, &query, limit, batch.as_deref()),
        Commands::Megadoc { query, batch } => commands::megadoc(&ctx, &query, batch.as_deref()),
        Commands::Prune { batch } => commands::prune(&ctx, batch.as_deref()),
    }
}

fn is_consistency_fault(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<CacheError>().is_some_and(CacheError::is_consistency_fault)
            || cause.downcast_ref::<TextError>().is_some_and(TextError::is_consistency_fault)
            || cause.downcast_ref::<archivist_core::error::Error>().is_some_and(archivist_core::error::Error::is_consistency_fault)
    })
}
