//! Resumable, cached search over a batch plus the text megadoc renderer.
//!
//! Every distinct query string gets one entry in `searches/search_index.json`
//! and one result file. A query is NEW (no entry), RUNNING (entry with
//! `complete = false`, result file holds a valid prefix) or COMPLETE. Repeated
//! and interrupted calls converge on the same single entry.

pub mod cache;
pub mod error;
pub mod megadoc;
pub mod slug;
pub mod store;

pub use cache::{search, search_batch, SearchCache, SearchOutcome};
pub use error::CacheError;
pub use megadoc::{megadoc_path, write_megadoc, MegadocReport};
pub use store::SearchIndexStore;
