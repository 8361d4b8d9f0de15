//! archivist-text
//!
//! Tantivy-based transcript indexing and search. `index` builds the inverted
//! index from a catalog, `query` parses the boolean grammar with fuzzy `word~N`
//! terms, `search` runs queries and resolves hits to records.

pub mod error;
pub mod index;
pub mod query;
pub mod search;
pub mod tantivy_utils;

pub use error::TextError;
pub use index::{fulltext_dir, IndexReport, TranscriptIndexer};
pub use query::QueryOptions;
pub use search::{SearchResult, TranscriptSearchEngine};
