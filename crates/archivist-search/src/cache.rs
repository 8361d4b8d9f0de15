use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use archivist_core::catalog::{BatchLayout, CATALOG_FILE};
use archivist_core::persist::{read_json, write_json_atomic};
use archivist_core::traits::TranscriptSearcher;
use archivist_core::types::{Catalog, ImageRecord, MegadocState, SearchCacheEntry, SearchIndex, SearchStatus};
use archivist_text::{fulltext_dir, QueryOptions, TranscriptSearchEngine};

use crate::error::{CacheError, Result};
use crate::megadoc::{megadoc_path, write_megadoc, MegadocReport};
use crate::slug::search_slug;
use crate::store::SearchIndexStore;

/// Results of one `search` call together with the entry describing them.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<ImageRecord>,
    pub entry: SearchCacheEntry,
    /// Served from a COMPLETE entry without running the query.
    pub cached: bool,
}

pub struct SearchCache<S> {
    cache_dir: PathBuf,
    catalog: Catalog,
    searcher: S,
    store: SearchIndexStore,
}

impl SearchCache<TranscriptSearchEngine> {
    /// Loads `index.json` and the transcript index from a batch cache directory.
    pub fn open(cache_dir: &Path, options: QueryOptions) -> Result<Self> {
        let catalog = Catalog::load(&cache_dir.join(CATALOG_FILE))?;
        let engine = TranscriptSearchEngine::open(&fulltext_dir(cache_dir), options)?;
        Ok(Self::new(cache_dir, catalog, engine))
    }
}

impl<S: TranscriptSearcher> SearchCache<S> {
    pub fn new(cache_dir: &Path, catalog: Catalog, searcher: S) -> Self {
        Self { cache_dir: cache_dir.to_path_buf(), catalog, searcher, store: SearchIndexStore::new(cache_dir) }
    }

    pub fn catalog(&self) -> &Catalog { &self.catalog }

    pub fn store(&self) -> &SearchIndexStore { &self.store }

    pub fn searcher(&self) -> &S { &self.searcher }

    /// Runs `query` or resumes it, or returns its cached results.
    ///
    /// Results are persisted after every newly discovered match, so an
    /// interrupted run leaves a loadable prefix and an entry whose count
    /// matches it. The completion flag is the last thing written.
    pub fn search(&self, query: &str) -> Result<SearchOutcome> {
        let _running = self.store.lock_query(query)?;

        let (entry, created) = self.store.get_or_create(query, || self.new_entry(query))?;
        if created {
            info!(query, path = %entry.path, "New cached search");
        }
        if entry.complete {
            let results = self.load_results(&entry)?;
            info!(query, results = results.len(), "Found cached search");
            return Ok(SearchOutcome { results, entry, cached: true });
        }

        info!(query, documents = self.catalog.images.len(), resumed_from = entry.count, "Querying");
        let hits = self.searcher.search_all(query).map_err(CacheError::Search)?;
        let lookup = self.catalog.lookup();
        let matches = hits.iter().map(|h| lookup.resolve(&h.id)).collect::<archivist_core::error::Result<Vec<_>>>()?;

        let result_file = PathBuf::from(&entry.path);
        let mut results = self.resume_prefix(&entry);
        for (i, record) in matches.into_iter().enumerate() {
            if i < results.len() {
                if results[i] == *record {
                    continue;
                }
                debug!(query, position = i, "Result order changed since last run, discarding the rest of the prefix");
                results.truncate(i);
            }
            results.push(record.clone());
            write_json_atomic(&result_file, &results)?;
            let count = results.len();
            self.store.update(&entry.id, |e| e.count = count)?;
        }
        // A shorter re-run leaves stale records past the end of the prefix.
        results.truncate(hits.len());

        write_json_atomic(&result_file, &results)?;
        let entry = self.store.update(&entry.id, |e| {
            e.count = results.len();
            e.complete = true;
        })?;
        info!(query, results = results.len(), documents = self.catalog.images.len(), "Search complete");
        Ok(SearchOutcome { results, entry, cached: false })
    }

    /// Status for polling callers; `None` when the query was never submitted.
    pub fn status(&self, query: &str) -> Result<Option<SearchStatus>> {
        Ok(self.store.load()?.find(query).map(SearchCacheEntry::status))
    }

    pub fn entry(&self, query: &str) -> Result<Option<SearchCacheEntry>> {
        Ok(self.store.load()?.find(query).cloned())
    }

    pub fn entries(&self) -> Result<SearchIndex> {
        self.store.load()
    }

    /// The persisted result set of an entry, complete or not.
    pub fn load_results(&self, entry: &SearchCacheEntry) -> Result<Vec<ImageRecord>> {
        Ok(read_json(Path::new(&entry.path))?)
    }

    /// Renders the megadoc for a COMPLETE query, or returns the one already
    /// recorded on its entry. Progress is stored on the entry: `complete` is
    /// cleared before rendering and set once the file is in place.
    pub fn megadoc(&self, query: &str, root_url: &str) -> Result<MegadocReport> {
        let _running = self.store.lock_query(query)?;
        let entry = self.store.load()?.find(query).cloned().ok_or_else(|| CacheError::NotFound(query.to_string()))?;
        if !entry.complete {
            return Err(CacheError::NotReady { query: query.to_string(), count: entry.count });
        }
        if let Some(state) = entry.megadoc.as_ref().filter(|m| m.complete && Path::new(&m.path).is_file()) {
            info!(query, path = %state.path, pages = state.pages, "Found megadoc");
            return Ok(MegadocReport { path: PathBuf::from(&state.path), pages: state.pages, skipped: state.skipped, cached: true });
        }

        let out_file = megadoc_path(&self.cache_dir, &entry);
        let path = out_file.to_string_lossy().to_string();
        self.store.update(&entry.id, |e| {
            e.megadoc = Some(MegadocState { path: path.clone(), pages: 0, skipped: 0, complete: false });
        })?;
        let results = self.load_results(&entry)?;
        let report = write_megadoc(&results, &out_file, root_url)?;
        self.store.update(&entry.id, |e| {
            e.megadoc = Some(MegadocState { path, pages: report.pages, skipped: report.skipped, complete: true });
        })?;
        Ok(report)
    }

    pub fn prune_orphans(&self) -> Result<Vec<SearchCacheEntry>> {
        let orphans = self.store.remove_orphans()?;
        if !orphans.is_empty() {
            info!(removed = orphans.len(), "Removed orphaned cache entries");
        }
        Ok(orphans)
    }

    fn new_entry(&self, query: &str) -> SearchCacheEntry {
        let timestamp = Local::now().naive_local();
        let path = self.store.dir().join(format!("{}.json", search_slug(timestamp, query)));
        SearchCacheEntry {
            id: uuid::Uuid::new_v4().to_string(),
            query_str: query.to_string(),
            timestamp,
            path: path.to_string_lossy().to_string(),
            count: 0,
            complete: false,
            megadoc: None,
        }
    }

    /// The prefix persisted by an interrupted run. Anything unreadable is
    /// recomputed from scratch.
    fn resume_prefix(&self, entry: &SearchCacheEntry) -> Vec<ImageRecord> {
        let path = Path::new(&entry.path);
        if !path.exists() {
            return Vec::new();
        }
        match read_json::<Vec<ImageRecord>>(path) {
            Ok(mut prefix) => {
                prefix.truncate(entry.count);
                prefix
            }
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Discarding unreadable partial results");
                Vec::new()
            }
        }
    }
}

/// Opens the batch cache at `cache_dir` and runs `query` through it.
pub fn search(query: &str, cache_dir: &Path, options: QueryOptions) -> Result<SearchOutcome> {
    SearchCache::open(cache_dir, options)?.search(query)
}

/// Like [`search`], for a batch laid out with the default `cache/` directory.
pub fn search_batch(query: &str, batch: &Path, options: QueryOptions) -> Result<SearchOutcome> {
    search(query, &BatchLayout::for_batch(batch).cache_dir, options)
}
