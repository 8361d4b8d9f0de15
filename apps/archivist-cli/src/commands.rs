use anyhow::{bail, Context as _, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use archivist_core::catalog::{BatchLayout, CatalogBuilder};
use archivist_core::config::{resolve_with_base, Config, Settings};
use archivist_core::types::{Catalog, ImageRecord, SearchCacheEntry, SearchStatus};
use archivist_search::{CacheError, SearchCache, SearchIndexStore};
use archivist_text::{fulltext_dir, QueryOptions, TranscriptIndexer, TranscriptSearchEngine};

/// Resolved configuration shared by every command.
pub struct Context {
    pub settings: Settings,
    base: PathBuf,
}

impl Context {
    /// Relative paths in an explicit config file resolve against its directory,
    /// otherwise against the working directory.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let cwd = env::current_dir().context("Failed to read working directory")?;
        let (config, base) = match config_path {
            Some(path) => {
                let base = path.parent().filter(|p| !p.as_os_str().is_empty()).map_or_else(|| cwd.clone(), Path::to_path_buf);
                (Config::from_file(path)?, base)
            }
            None => (Config::load()?, cwd),
        };
        Ok(Self { settings: config.settings()?, base })
    }

    /// `--batch` replaces the configured batch and its roots with the
    /// default layout around that directory.
    pub fn layout(&self, batch: Option<&Path>) -> BatchLayout {
        match batch {
            Some(dir) => BatchLayout::for_batch(&resolve_with_base(&self.base, dir.to_string_lossy())),
            None => BatchLayout::from_settings(&self.settings.batch, &self.base),
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions { fuzzy_distance: self.settings.search.fuzzy_distance, transpositions: self.settings.search.transpositions }
    }
}

pub fn index(ctx: &Context, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    info!(batch = %layout.name, images = %layout.image_root.display(), "Indexing batch");

    let (catalog, report) = CatalogBuilder::new(layout.clone()).build()?;
    catalog.save(&layout.catalog_file())?;
    let indexer = TranscriptIndexer::new(fulltext_dir(&layout.cache_dir)).with_memory_mb(ctx.settings.index.writer_memory_mb);
    let indexed = indexer.build(&catalog)?;

    println!("Catalogued {} images in {}", report.images, layout.catalog_file().display());
    if report.skipped_names > 0 {
        println!("  {} files skipped (unrecognised names)", report.skipped_names);
    }
    println!("  {} without metadata, {} without transcript", report.missing_json, report.missing_txt);
    println!(
        "Indexed {} transcripts ({} missing sidecars, {} unreadable)",
        indexed.indexed, indexed.skipped_missing, indexed.skipped_unreadable
    );
    Ok(())
}

pub fn search(ctx: &Context, query: &str, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    let cache = SearchCache::open(&layout.cache_dir, ctx.query_options())?;
    let outcome = cache.search(query)?;
    for record in &outcome.results {
        print_record(record);
    }
    let origin = if outcome.cached { "cached" } else { "fresh" };
    println!("{} results for '{}' ({origin}, {})", outcome.results.len(), query, outcome.entry.path);
    Ok(())
}

pub fn status(ctx: &Context, query: Option<&str>, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    let index = SearchIndexStore::new(&layout.cache_dir).load()?;
    match query {
        Some(query) => match index.find(query).map(SearchCacheEntry::status) {
            Some(status) => println!("{query}: {}", describe(status)),
            None => println!("{query}: never searched"),
        },
        None => {
            if index.is_empty() {
                println!("No cached searches");
            }
            for entry in &index.entries {
                println!("{}  {:<12} {}", entry.timestamp.format("%Y-%m-%d %H:%M:%S"), describe(entry.status()), entry.query_str);
            }
        }
    }
    Ok(())
}

pub fn query(ctx: &Context, query: &str, limit: usize, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    let catalog = Catalog::load(&layout.catalog_file())?;
    let engine = TranscriptSearchEngine::open(&fulltext_dir(&layout.cache_dir), ctx.query_options())?;
    let lookup = catalog.lookup();

    let results = engine.search(query, limit)?;
    for (rank, result) in results.iter().enumerate() {
        let record = lookup.resolve(&result.id)?;
        println!("{:>3}. [{:.3}] {} - {} ({})", rank + 1, result.score, record.album_title, record.title, record.timestamp_str);
        println!("     {}", result.snippet.replace('\n', " "));
    }
    println!("{} of {} documents shown", results.len(), engine.num_docs());
    Ok(())
}

pub fn megadoc(ctx: &Context, query: &str, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    let cache = SearchCache::open(&layout.cache_dir, ctx.query_options())?;
    let report = match cache.megadoc(query, &ctx.settings.megadoc.root_url) {
        Err(CacheError::NotFound(_)) => bail!("'{query}' has not been searched yet; run `archivist search` first"),
        other => other?,
    };
    let verb = if report.cached { "Already wrote" } else { "Wrote" };
    println!("{verb} {} pages to {} ({} without transcript)", report.pages, report.path.display(), report.skipped);
    Ok(())
}

pub fn prune(ctx: &Context, batch: Option<&Path>) -> Result<()> {
    let layout = ctx.layout(batch);
    let cache = SearchCache::open(&layout.cache_dir, ctx.query_options())?;
    let removed = cache.prune_orphans()?;
    for entry in &removed {
        println!("removed {} ({})", entry.query_str, entry.path);
    }
    println!("{} orphaned entries removed", removed.len());
    Ok(())
}

fn describe(status: SearchStatus) -> String {
    match status {
        SearchStatus::Running { count } => format!("running ({count})"),
        SearchStatus::Complete { count } => format!("complete ({count})"),
    }
}

fn print_record(record: &ImageRecord) {
    let file = Path::new(&record.path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    println!(
        "{:06}_{}_{}  {}  {}",
        record.ordinal,
        record.timestamp.format("%Y-%m-%d_%H-%M-%S"),
        file,
        record.album_title,
        record.timestamp_str
    );
}
