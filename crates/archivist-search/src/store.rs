//! The persisted SearchIndex and the locks that serialize access to it.
//!
//! Two lock levels, both advisory file locks so they also hold across
//! processes:
//! - the index lock guards each read-modify-write of `search_index.json`;
//! - a per-query lock is held for a whole search, so at most one execution
//!   per query string runs at a time.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use archivist_core::persist::{read_json, write_json_atomic};
use archivist_core::types::{SearchCacheEntry, SearchIndex};

use crate::error::{CacheError, Result};

/// Directory for per-query result files and the SearchIndex, inside the cache dir.
pub const SEARCHES_DIR: &str = "searches";
pub const SEARCH_INDEX_FILE: &str = "search_index.json";
const INDEX_LOCK_FILE: &str = ".search_index.lock";
const QUERY_LOCK_DIR: &str = "locks";

/// Exclusive lock released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Lock { path: path.display().to_string(), source })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| CacheError::Lock { path: path.display().to_string(), source })?;
        file.lock_exclusive().map_err(|source| CacheError::Lock { path: path.display().to_string(), source })?;
        debug!(path = %path.display(), "Lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchIndexStore {
    dir: PathBuf,
}

impl SearchIndexStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self { dir: cache_dir.join(SEARCHES_DIR) }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn index_file(&self) -> PathBuf { self.dir.join(SEARCH_INDEX_FILE) }

    /// Current SearchIndex; empty when nothing has been cached yet.
    pub fn load(&self) -> Result<SearchIndex> {
        let _lock = self.lock_index()?;
        self.read_unlocked()
    }

    /// Held for the whole execution of `query`. Lock files are never deleted:
    /// unlinking one that another process holds or waits on splits the lock.
    pub fn lock_query(&self, query: &str) -> Result<FileLock> {
        let hash = blake3::hash(query.as_bytes()).to_hex();
        FileLock::acquire(self.dir.join(QUERY_LOCK_DIR).join(format!("{}.lock", &hash[..16])))
    }

    /// Atomic create-if-absent keyed by the exact query string. Returns the
    /// authoritative entry and whether it was created by this call.
    pub fn get_or_create(&self, query: &str, make: impl FnOnce() -> SearchCacheEntry) -> Result<(SearchCacheEntry, bool)> {
        let _lock = self.lock_index()?;
        let mut index = self.read_unlocked()?;
        if let Some(existing) = index.find(query) {
            return Ok((existing.clone(), false));
        }
        let entry = make();
        index.push(entry.clone());
        write_json_atomic(&self.index_file(), &index)?;
        Ok((entry, true))
    }

    /// Applies `f` to the entry with `id` and persists the index.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut SearchCacheEntry)) -> Result<SearchCacheEntry> {
        let _lock = self.lock_index()?;
        let mut index = self.read_unlocked()?;
        let entry = index.find_by_id_mut(id).ok_or_else(|| CacheError::NotFound(id.to_string()))?;
        f(entry);
        let updated = entry.clone();
        write_json_atomic(&self.index_file(), &index)?;
        Ok(updated)
    }

    /// Drops duplicate entries that lost to a more progressed one. Their
    /// result files are deleted unless the winner shares them.
    pub fn remove_orphans(&self) -> Result<Vec<SearchCacheEntry>> {
        let _lock = self.lock_index()?;
        let mut index = self.read_unlocked()?;
        let orphans = index.take_orphans();
        if orphans.is_empty() {
            return Ok(orphans);
        }
        write_json_atomic(&self.index_file(), &index)?;
        for orphan in &orphans {
            let shared = index.entries.iter().any(|e| e.path == orphan.path);
            if !shared && Path::new(&orphan.path).is_file() {
                if let Err(e) = fs::remove_file(&orphan.path) {
                    warn!(path = %orphan.path, error = %e, "Failed to delete orphaned result file");
                }
            }
        }
        Ok(orphans)
    }

    fn lock_index(&self) -> Result<FileLock> {
        FileLock::acquire(self.dir.join(INDEX_LOCK_FILE))
    }

    fn read_unlocked(&self) -> Result<SearchIndex> {
        let file = self.index_file();
        if !file.exists() {
            return Ok(SearchIndex::default());
        }
        Ok(read_json(&file)?)
    }
}
