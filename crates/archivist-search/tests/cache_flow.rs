use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use archivist_core::catalog::{BatchLayout, CatalogBuilder};
use archivist_core::persist::write_json_atomic;
use archivist_core::traits::TranscriptSearcher;
use archivist_core::types::{Catalog, ImageRecord, SearchCacheEntry, SearchHit, SearchIndex, SearchStatus};
use archivist_search::{megadoc_path, search, search_batch, write_megadoc, CacheError, SearchCache, SearchIndexStore};
use archivist_text::{fulltext_dir, QueryOptions, TranscriptIndexer};

struct Batch {
    _tmp: TempDir,
    layout: BatchLayout,
}

impl Batch {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let batch = tmp.path().join("batch");
        fs::create_dir_all(&batch).unwrap();
        let layout = BatchLayout::for_batch(&batch);
        Self { _tmp: tmp, layout }
    }

    fn image(&self, album: &str, file: &str, transcript: Option<&str>) {
        let img_dir = self.layout.image_root.join(album);
        fs::create_dir_all(&img_dir).unwrap();
        fs::write(img_dir.join(file), b"jpeg").unwrap();
        let stem = Path::new(file).file_stem().unwrap().to_string_lossy().to_string();
        let json_dir = self.layout.sidecar_root.join(album).join("json");
        fs::create_dir_all(&json_dir).unwrap();
        fs::write(json_dir.join(format!("{stem}.json")), b"{}").unwrap();
        if let Some(text) = transcript {
            let txt_dir = self.layout.sidecar_root.join(album).join("txt");
            fs::create_dir_all(&txt_dir).unwrap();
            fs::write(txt_dir.join(format!("{stem}.txt")), text).unwrap();
        }
    }

    fn cache_dir(&self) -> &Path {
        &self.layout.cache_dir
    }

    /// Catalogs the batch, saves `index.json` and builds the transcript index.
    fn index(&self) -> Catalog {
        let (catalog, _) = CatalogBuilder::new(self.layout.clone()).build().unwrap();
        catalog.save(&self.layout.catalog_file()).unwrap();
        TranscriptIndexer::new(fulltext_dir(self.cache_dir())).build(&catalog).unwrap();
        catalog
    }
}

fn scenario() -> Batch {
    let b = Batch::new();
    b.image("2023-07", "1_2023-07-01_09-15-00_IMG_0001.JPG", Some("Dear Margaret, the harvest festival was wonderful this year."));
    b.image("2023-07", "2_2023-07-03_14-02-10_IMG_0002.JPG", Some("Grandfather repaired the lighthouse lamp before the storm."));
    b.image("2023-07", "3_2023-07-09_20-40-00_IMG_0003.JPG", None);
    b.image("2023-08", "1_2023-08-02_08-00-00_IMG_0101.JPG", Some("The harvest moon rose over the orchard."));
    b.image("2023-08", "2_2023-08-05_17-30-00_IMG_0102.JPG", Some("Receipt for the new tractor, paid in full."));
    b
}

/// Returns fixed hits and counts how often it was asked.
struct FixedSearcher {
    hits: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl FixedSearcher {
    fn new(ids: &[&str]) -> Self {
        let hits = ids.iter().map(|id| SearchHit { id: id.to_string(), score: 1.0 }).collect();
        Self { hits, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TranscriptSearcher for FixedSearcher {
    fn search_all(&self, _query: &str) -> anyhow::Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

fn read_index(cache_dir: &Path) -> SearchIndex {
    SearchIndexStore::new(cache_dir).load().unwrap()
}

fn ids(records: &[ImageRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

#[test]
fn new_query_runs_and_completes() {
    let b = scenario();
    b.index();

    let outcome = search("lighthouse", b.cache_dir(), QueryOptions::default()).unwrap();
    assert!(!outcome.cached);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].album_title, "July 2023");
    assert_eq!(outcome.entry.status(), SearchStatus::Complete { count: 1 });
    assert!(Path::new(&outcome.entry.path).is_file());
    assert!(outcome.entry.path.contains("lighthouse"));

    let index = read_index(b.cache_dir());
    assert_eq!(index.len(), 1);
    assert_eq!(index.entries[0].query_str, "lighthouse");
}

#[test]
fn no_matches_is_a_complete_empty_entry() {
    let b = scenario();
    b.index();

    let outcome = search("zeppelin", b.cache_dir(), QueryOptions::default()).unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.entry.complete);
    assert_eq!(outcome.entry.count, 0);
    let persisted: Vec<ImageRecord> = serde_json::from_str(&fs::read_to_string(&outcome.entry.path).unwrap()).unwrap();
    assert!(persisted.is_empty());
}

#[test]
fn repeated_query_is_served_from_cache() {
    let b = scenario();
    let catalog = b.index();
    let harvest: Vec<String> = catalog.images.iter().filter(|r| r.ordinal == 1).map(|r| r.id.clone()).collect();
    let searcher = FixedSearcher::new(&harvest.iter().map(String::as_str).collect::<Vec<_>>());
    let cache = SearchCache::new(b.cache_dir(), catalog, searcher);

    let first = cache.search("harvest").unwrap();
    let second = cache.search("harvest").unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.results, second.results);
    assert_eq!(first.entry, second.entry);
    assert_eq!(cache.entries().unwrap().len(), 1);
}

#[test]
fn complete_entries_never_reach_the_searcher() {
    let b = scenario();
    let catalog = b.index();
    let id = catalog.images[0].id.clone();
    let cache = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[&id]));
    for _ in 0..3 {
        cache.search("q").unwrap();
    }
    assert_eq!(cache.searcher().calls(), 1);

    // A second cache over the same directory sees the entry too.
    let catalog = Catalog::load(&b.layout.catalog_file()).unwrap();
    let other = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[&id]));
    assert!(other.search("q").unwrap().cached);
    assert_eq!(other.searcher().calls(), 0);
}

#[test]
fn interrupted_search_resumes_to_the_same_result() {
    let reference = scenario();
    reference.index();
    let expected = search("harvest", reference.cache_dir(), QueryOptions::default()).unwrap();
    assert_eq!(expected.results.len(), 2);

    let b = scenario();
    b.index();
    let first = search("harvest", b.cache_dir(), QueryOptions::default()).unwrap();

    // Rewind to the state of a run killed after its first match.
    let store = SearchIndexStore::new(b.cache_dir());
    write_json_atomic(Path::new(&first.entry.path), &first.results[..1].to_vec()).unwrap();
    store
        .update(&first.entry.id, |e| {
            e.count = 1;
            e.complete = false;
        })
        .unwrap();
    let cache = SearchCache::open(b.cache_dir(), QueryOptions::default()).unwrap();
    assert_eq!(cache.status("harvest").unwrap(), Some(SearchStatus::Running { count: 1 }));

    let resumed = cache.search("harvest").unwrap();
    assert!(!resumed.cached);
    assert_eq!(ids(&resumed.results), ids(&expected.results));
    assert_eq!(resumed.entry.id, first.entry.id);
    assert_eq!(resumed.entry.status(), SearchStatus::Complete { count: 2 });
    assert_eq!(read_index(b.cache_dir()).len(), 1);
}

#[test]
fn records_past_the_persisted_count_are_recomputed() {
    let b = scenario();
    let catalog = b.index();
    let all: Vec<String> = catalog.images.iter().map(|r| r.id.clone()).collect();
    let hits: Vec<&str> = all.iter().map(String::as_str).collect();
    let cache = SearchCache::new(b.cache_dir(), catalog.clone(), FixedSearcher::new(&hits));
    let full = cache.search("everything").unwrap();

    // Crash between writing the file and bumping the count: the file holds a
    // garbage tail beyond `count`.
    let mut tampered = full.results.clone();
    tampered.truncate(2);
    tampered.push(full.results[4].clone());
    write_json_atomic(Path::new(&full.entry.path), &tampered).unwrap();
    cache.store().update(&full.entry.id, |e| {
        e.count = 2;
        e.complete = false;
    }).unwrap();

    let resumed = cache.search("everything").unwrap();
    assert_eq!(ids(&resumed.results), all);
    assert_eq!(resumed.entry.count, all.len());
}

#[test]
fn unknown_hit_is_a_consistency_fault_and_writes_nothing() {
    let b = scenario();
    let catalog = b.index();
    let known = catalog.images[0].id.clone();
    let searcher = FixedSearcher::new(&[&known, "0000000000000000000000000000dead"]);
    let cache = SearchCache::new(b.cache_dir(), catalog, searcher);

    let err = cache.search("drift").unwrap_err();
    assert!(err.is_consistency_fault(), "unexpected error: {err}");
    let entry = cache.entry("drift").unwrap().unwrap();
    assert_eq!(entry.status(), SearchStatus::Running { count: 0 });
    assert!(!Path::new(&entry.path).exists());
}

#[test]
fn empty_result_is_not_a_fault() {
    let b = scenario();
    let catalog = b.index();
    let cache = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[]));
    let outcome = cache.search("nothing").unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.entry.complete);
}

#[test]
fn duplicate_entries_resolve_to_the_most_progressed() {
    let b = scenario();
    let catalog = b.index();
    let id = catalog.images[0].id.clone();
    let cache = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[&id]));
    let done = cache.search("storm").unwrap().entry;

    let stale_path = cache.store().dir().join("stale.json");
    write_json_atomic(&stale_path, &Vec::<ImageRecord>::new()).unwrap();
    let stale = SearchCacheEntry {
        id: "stale".into(),
        query_str: "storm".into(),
        timestamp: done.timestamp,
        path: stale_path.to_string_lossy().to_string(),
        count: 0,
        complete: false,
        megadoc: None,
    };
    let mut index = read_index(b.cache_dir());
    index.entries.insert(0, stale);
    write_json_atomic(&cache.store().index_file(), &index).unwrap();

    let outcome = cache.search("storm").unwrap();
    assert!(outcome.cached);
    assert_eq!(outcome.entry.id, done.id);

    let orphans = cache.prune_orphans().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].id, "stale");
    assert!(!stale_path.exists());
    assert!(Path::new(&done.path).exists());
    assert_eq!(read_index(b.cache_dir()).len(), 1);
}

#[test]
fn concurrent_first_searches_share_one_entry() {
    let b = scenario();
    b.index();
    let cache = SearchCache::open(b.cache_dir(), QueryOptions::default()).unwrap();

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| cache.search("harvest").unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let index = read_index(b.cache_dir());
    assert_eq!(index.len(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.cached).count(), 1);
    for outcome in &outcomes {
        assert_eq!(outcome.entry.id, index.entries[0].id);
        assert_eq!(outcome.results.len(), 2);
    }
}

#[test]
fn distinct_queries_get_distinct_entries() {
    let b = scenario();
    let catalog = b.index();
    let id = catalog.images[0].id.clone();
    let searcher = FixedSearcher::new(&[&id]);
    let cache = SearchCache::new(b.cache_dir(), catalog, searcher);
    assert_eq!(cache.status("harvest").unwrap(), None);

    let a = cache.search("harvest").unwrap().entry;
    let c = cache.search("Harvest").unwrap().entry;
    assert_ne!(a.id, c.id);
    assert_ne!(a.path, c.path);
    assert_eq!(cache.entries().unwrap().len(), 2);
}

#[test]
fn megadoc_from_cached_results() {
    let b = scenario();
    b.index();
    let outcome = search("harvest", b.cache_dir(), QueryOptions::default()).unwrap();

    let out: PathBuf = megadoc_path(b.cache_dir(), &outcome.entry);
    let report = write_megadoc(&outcome.results, &out, "https://archive.example").unwrap();
    assert_eq!(report.pages, 2);
    let text = fs::read_to_string(&out).unwrap();
    assert!(text.contains("album: July 2023 - 1 of 3"));
    assert!(text.contains("album: August 2023 - 1 of 2"));
    assert!(text.find("festival").unwrap() < text.find("orchard").unwrap());
}

#[test]
fn megadoc_progress_is_recorded_and_reused() {
    let b = scenario();
    b.index();
    let cache = SearchCache::open(b.cache_dir(), QueryOptions::default()).unwrap();
    let outcome = cache.search("harvest").unwrap();

    let first = cache.megadoc("harvest", "https://archive.example").unwrap();
    assert!(!first.cached);
    assert_eq!(first.pages, 2);
    assert_eq!(first.path, megadoc_path(b.cache_dir(), &outcome.entry));
    let state = cache.entry("harvest").unwrap().unwrap().megadoc.unwrap();
    assert!(state.complete);
    assert_eq!(state.pages, 2);
    assert_eq!(PathBuf::from(&state.path), first.path);

    let second = cache.megadoc("harvest", "https://archive.example").unwrap();
    assert!(second.cached);
    assert_eq!(second.pages, 2);

    // A recorded megadoc whose file is gone is rendered again.
    fs::remove_file(&first.path).unwrap();
    let third = cache.megadoc("harvest", "https://archive.example").unwrap();
    assert!(!third.cached);
    assert!(third.path.is_file());
}

#[test]
fn megadoc_needs_a_complete_search() {
    let b = scenario();
    let catalog = b.index();
    let known = catalog.images[0].id.clone();
    let cache = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[&known, "0000000000000000000000000000dead"]));

    assert!(matches!(cache.megadoc("storm", "https://archive.example"), Err(CacheError::NotFound(_))));
    cache.search("storm").unwrap_err();
    match cache.megadoc("storm", "https://archive.example") {
        Err(CacheError::NotReady { count, .. }) => assert_eq!(count, 0),
        other => panic!("expected NotReady, got {other:?}"),
    }
    assert!(!b.cache_dir().join("megadocs").exists());
}

#[test]
fn result_write_failure_is_fatal_and_leaves_the_entry_running() {
    let b = scenario();
    let catalog = b.index();
    let id = catalog.images[0].id.clone();
    let cache = SearchCache::new(b.cache_dir(), catalog, FixedSearcher::new(&[&id]));

    // The result path is occupied by a directory, so no result file can land there.
    let blocked = cache.store().dir().join("blocked.json");
    fs::create_dir_all(&blocked).unwrap();
    let (entry, created) = cache
        .store()
        .get_or_create("storm", || SearchCacheEntry {
            id: "blocked".into(),
            query_str: "storm".into(),
            timestamp: chrono::NaiveDateTime::default(),
            path: blocked.to_string_lossy().to_string(),
            count: 0,
            complete: false,
            megadoc: None,
        })
        .unwrap();
    assert!(created);

    let err = cache.search("storm").unwrap_err();
    assert!(!err.is_consistency_fault(), "unexpected error: {err}");
    let after = cache.entry("storm").unwrap().unwrap();
    assert_eq!(after.id, entry.id);
    assert_eq!(after.status(), SearchStatus::Running { count: 0 });
    assert!(read_index(b.cache_dir()).entries.iter().all(|e| !e.complete));
}

#[test]
fn unwritable_searches_directory_fails_the_search() {
    let b = scenario();
    b.index();
    fs::write(b.cache_dir().join("searches"), b"not a directory").unwrap();

    assert!(search("harvest", b.cache_dir(), QueryOptions::default()).is_err());
    assert!(b.cache_dir().join("searches").is_file());
}

#[test]
fn batch_path_entry_point_uses_the_batch_cache() {
    let b = scenario();
    b.index();
    let outcome = search_batch("tractor", &b.layout.sidecar_root, QueryOptions::default()).unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(Path::new(&outcome.entry.path).starts_with(b.cache_dir()));
    assert_eq!(read_index(b.cache_dir()).len(), 1);
}

#[test]
fn searching_an_unindexed_batch_fails() {
    let b = scenario();
    assert!(SearchCache::open(b.cache_dir(), QueryOptions::default()).is_err());
}
