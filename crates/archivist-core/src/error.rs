use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Unrecognized image filename '{name}': {reason}")]
    InvalidFilename { name: String, reason: String },

    /// The full-text index returned a document the catalog does not know.
    /// Catalog and index were rebuilt out of step.
    #[error("Catalog/index drift: document '{id}' is in the full-text index but not in the catalog")]
    ConsistencyFault { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_consistency_fault(&self) -> bool {
        matches!(self, Error::ConsistencyFault { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
