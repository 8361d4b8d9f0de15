use crate::types::SearchHit;

/// Full-text search over transcripts, as consumed by the search cache.
pub trait TranscriptSearcher: Send + Sync {
    /// Every matching document, in the engine's relevance order. No limit.
    fn search_all(&self, query: &str) -> anyhow::Result<Vec<SearchHit>>;
}
