//! Domain types shared by the indexer, the full-text engine and the search cache.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type RecordId = String;

/// Schema tag written into every catalog file.
pub const CATALOG_SCHEMA: &str = "archivist_v1";

/// One indexed image.
///
/// - `id`: stable identifier, unique within a catalog
/// - `ordinal`: 1-based position within the album, from the filename
/// - `timestamp`/`timestamp_str`: creation time (naive local) and its display form
/// - `path`: absolute path to the image
/// - `json_path`/`txt_path`: metadata and OCR sidecars, empty when missing
/// - `album`/`album_title`/`album_path`: directory name, "Month YYYY" title, directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "uuid")]
    pub id: RecordId,
    #[serde(rename = "index")]
    pub ordinal: u32,
    pub title: String,
    pub timestamp: NaiveDateTime,
    pub timestamp_str: String,
    pub path: String,
    pub json_path: String,
    pub txt_path: String,
    pub album: String,
    pub album_title: String,
    pub album_path: String,
}

impl ImageRecord {
    /// Both sidecars were found at catalog time.
    pub fn has_sidecars(&self) -> bool {
        !self.json_path.is_empty() && !self.txt_path.is_empty()
    }
}

/// The full ordered metadata index over one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub schema: String,
    #[serde(rename = "uuid")]
    pub id: String,
    pub batch: String,
    pub cache_path: String,
    pub timestamp: NaiveDateTime,
    pub images: Vec<ImageRecord>,
}

/// A full-text hit. `id` matches `ImageRecord::id`; higher score is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: RecordId,
    pub score: f32,
}

/// Progress of one cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SearchStatus {
    Running { count: usize },
    Complete { count: usize },
}

impl SearchStatus {
    pub fn count(&self) -> usize {
        match self {
            SearchStatus::Running { count } | SearchStatus::Complete { count } => *count,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SearchStatus::Complete { .. })
    }
}

/// Cache bookkeeping for one distinct query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCacheEntry {
    #[serde(rename = "uuid")]
    pub id: String,
    pub query_str: String,
    pub timestamp: NaiveDateTime,
    pub path: String,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub complete: bool,
    /// Progress of the megadoc rendered from this entry's results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub megadoc: Option<MegadocState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MegadocState {
    pub path: String,
    pub pages: usize,
    /// Records without a readable transcript.
    #[serde(default)]
    pub skipped: usize,
    pub complete: bool,
}

impl SearchCacheEntry {
    pub fn status(&self) -> SearchStatus {
        if self.complete {
            SearchStatus::Complete { count: self.count }
        } else {
            SearchStatus::Running { count: self.count }
        }
    }

    /// Ordering used to pick the authoritative entry among duplicates:
    /// complete beats running, then the larger count wins.
    fn progress(&self) -> (bool, usize) {
        (self.complete, self.count)
    }
}

/// Every cached query, persisted as a single JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchIndex {
    pub entries: Vec<SearchCacheEntry>,
}

impl SearchIndex {
    /// The authoritative entry for `query`. Duplicates should not exist, but
    /// when they do the most progressed one wins and earlier entries win ties.
    pub fn find(&self, query: &str) -> Option<&SearchCacheEntry> {
        let mut best: Option<&SearchCacheEntry> = None;
        for entry in self.entries.iter().filter(|e| e.query_str == query) {
            match best {
                Some(b) if b.progress() >= entry.progress() => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut SearchCacheEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn push(&mut self, entry: SearchCacheEntry) {
        self.entries.push(entry);
    }

    /// Removes entries that lost to another entry for the same query and
    /// returns them.
    pub fn take_orphans(&mut self) -> Vec<SearchCacheEntry> {
        let keep: Vec<String> = {
            let mut ids = Vec::new();
            for entry in &self.entries {
                if let Some(winner) = self.find(&entry.query_str) {
                    if !ids.contains(&winner.id) {
                        ids.push(winner.id.clone());
                    }
                }
            }
            ids
        };
        let (kept, orphans): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| keep.contains(&e.id));
        self.entries = kept;
        orphans
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, query: &str, count: usize, complete: bool) -> SearchCacheEntry {
        SearchCacheEntry {
            id: id.to_string(),
            query_str: query.to_string(),
            timestamp: NaiveDateTime::default(),
            path: format!("/tmp/{id}.json"),
            count,
            complete,
            megadoc: None,
        }
    }

    #[test]
    fn find_matches_exact_query_only() {
        let index = SearchIndex { entries: vec![entry("a", "Harvest", 1, true)] };
        assert!(index.find("harvest").is_none());
        assert_eq!(index.find("Harvest").map(|e| e.id.as_str()), Some("a"));
    }

    #[test]
    fn find_prefers_most_progressed_duplicate() {
        let index = SearchIndex {
            entries: vec![
                entry("a", "q", 5, false),
                entry("b", "q", 2, true),
                entry("c", "q", 9, false),
            ],
        };
        assert_eq!(index.find("q").map(|e| e.id.as_str()), Some("b"));
    }

    #[test]
    fn take_orphans_keeps_one_entry_per_query() {
        let mut index = SearchIndex {
            entries: vec![
                entry("a", "q", 1, false),
                entry("b", "other", 0, true),
                entry("c", "q", 3, false),
            ],
        };
        let orphans = index.take_orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "a");
        let ids: Vec<_> = index.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn status_reflects_completion_flag() {
        assert_eq!(entry("a", "q", 4, false).status(), SearchStatus::Running { count: 4 });
        assert!(entry("a", "q", 0, true).status().is_complete());
    }

    #[test]
    fn entries_without_megadoc_progress_still_load() {
        let json = r#"[{"uuid":"a","query_str":"q","timestamp":"2024-01-01T00:00:00","path":"/tmp/a.json"}]"#;
        let index: SearchIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.entries[0].megadoc, None);
        assert_eq!(index.entries[0].status(), SearchStatus::Running { count: 0 });
        let back = serde_json::to_value(&index).unwrap();
        assert!(back[0].get("megadoc").is_none());
    }

    #[test]
    fn record_serializes_with_collaborator_field_names() {
        let record = ImageRecord {
            id: "abc".into(),
            ordinal: 3,
            title: "IMG_0003".into(),
            timestamp: NaiveDateTime::default(),
            timestamp_str: "January 01, 1970 at 12:00 AM".into(),
            path: "/img/2023-07/x.jpg".into(),
            json_path: String::new(),
            txt_path: "/b/2023-07/txt/x.txt".into(),
            album: "2023-07".into(),
            album_title: "July 2023".into(),
            album_path: "/img/2023-07".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["uuid"], "abc");
        assert_eq!(value["index"], 3);
        assert_eq!(value["txt_path"], "/b/2023-07/txt/x.txt");
        assert!(!record.has_sidecars());
    }
}
