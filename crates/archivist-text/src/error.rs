use thiserror::Error;

#[derive(Debug, Error)]
pub enum TextError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] archivist_core::error::Error),
}

impl TextError {
    pub fn is_consistency_fault(&self) -> bool {
        matches!(self, TextError::Core(e) if e.is_consistency_fault())
    }
}
