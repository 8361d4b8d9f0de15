use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Core(#[from] archivist_core::error::Error),

    #[error(transparent)]
    Text(#[from] archivist_text::TextError),

    #[error("Search failed: {0:#}")]
    Search(anyhow::Error),

    #[error("Failed to lock {path}: {source}")]
    Lock { path: String, source: std::io::Error },

    #[error("No cached search for '{0}'")]
    NotFound(String),

    #[error("Search for '{query}' is still running ({count} results so far)")]
    NotReady { query: String, count: usize },
}

impl CacheError {
    /// Index/catalog drift, as opposed to an ordinary failure or an empty result.
    pub fn is_consistency_fault(&self) -> bool {
        match self {
            CacheError::Core(e) => e.is_consistency_fault(),
            CacheError::Text(e) => e.is_consistency_fault(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
