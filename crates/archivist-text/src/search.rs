use std::path::Path;
use std::thread;
use std::time::Duration;
use tantivy::collector::TopDocs;
use tantivy::query::Query;
use tantivy::schema::{Field, Value};
use tantivy::{Index, IndexReader, TantivyDocument};
use tracing::debug;

use archivist_core::catalog::CatalogLookup;
use archivist_core::error::Error;
use archivist_core::traits::TranscriptSearcher;
use archivist_core::types::{ImageRecord, SearchHit};

use crate::error::TextError;
use crate::index::{sibling_dir, RETIRED_SUFFIX};
use crate::query::{build_query, QueryOptions};
use crate::tantivy_utils::{register_tokenizer, CONTENT_FIELD, ID_FIELD};

const SWAP_POLL: Duration = Duration::from_millis(50);
const SWAP_POLLS: u32 = 40;

/// True once `meta.json` is present. While a rebuild is swapping directories
/// the retired index exists and the live one does not, so poll for a while.
fn wait_for_index(index_dir: &Path) -> bool {
	let meta = index_dir.join("meta.json");
	let retired = sibling_dir(index_dir, RETIRED_SUFFIX);
	for _ in 0..SWAP_POLLS {
		if meta.exists() { return true; }
		if !retired.exists() { return meta.exists(); }
		debug!(path = %index_dir.display(), "Index swap in progress, waiting");
		thread::sleep(SWAP_POLL);
	}
	meta.exists()
}

pub struct TranscriptSearchEngine {
	index: Index,
	reader: IndexReader,
	id_field: Field,
	content_field: Field,
	options: QueryOptions,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
	pub score: f32,
	pub id: String,
	pub snippet: String,
}

impl TranscriptSearchEngine {
	pub fn open(index_dir: &Path, options: QueryOptions) -> Result<Self, TextError> {
		if !wait_for_index(index_dir) {
			return Err(Error::NotFound(format!("transcript index at {}", index_dir.display())).into());
		}
		let index = Index::open_in_dir(index_dir)?;
		register_tokenizer(&index);
		let reader = index.reader()?;
		let schema = index.schema();
		let id_field = schema.get_field(ID_FIELD)?;
		let content_field = schema.get_field(CONTENT_FIELD)?;
		Ok(Self { index, reader, id_field, content_field, options })
	}

	pub fn num_docs(&self) -> u64 { self.reader.searcher().num_docs() }

	/// Every matching document, best first.
	pub fn find_all(&self, query_text: &str) -> Result<Vec<SearchHit>, TextError> {
		let searcher = self.reader.searcher();
		let Some(query) = self.parse(query_text)? else { return Ok(vec![]) };
		let total = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
		if total == 0 { return Ok(vec![]); }
		let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(total))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			hits.push(SearchHit { id: self.stored_id(&doc)?, score });
		}
		debug!(query = query_text, hits = hits.len(), "Transcript search");
		Ok(hits)
	}

	/// Top `limit` hits with highlighted snippets, for interactive use.
	pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<SearchResult>, TextError> {
		let searcher = self.reader.searcher();
		let Some(query) = self.parse(query_text)? else { return Ok(vec![]) };
		if limit == 0 { return Ok(vec![]); }
		let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(limit))?;
		let snippet_generator = tantivy::snippet::SnippetGenerator::create(&searcher, query.as_ref(), self.content_field)?;
		let mut results = Vec::new();
		for (score, doc_address) in top_docs {
			let doc: TantivyDocument = searcher.doc(doc_address)?;
			let snippet = snippet_generator.snippet_from_doc(&doc);
			results.push(SearchResult { score, id: self.stored_id(&doc)?, snippet: snippet.to_html() });
		}
		Ok(results)
	}

	/// Runs the query and resolves every hit to its catalog record, in hit order.
	/// A hit missing from the catalog is a consistency fault, never a skip.
	pub fn execute_query(&self, query_text: &str, lookup: &CatalogLookup<'_>) -> Result<Vec<ImageRecord>, TextError> {
		let hits = self.find_all(query_text)?;
		let mut records = Vec::with_capacity(hits.len());
		for hit in hits {
			records.push(lookup.resolve(&hit.id)?.clone());
		}
		Ok(records)
	}

	fn parse(&self, query_text: &str) -> Result<Option<Box<dyn Query>>, TextError> {
		build_query(&self.index, self.content_field, query_text, &self.options)
	}

	fn stored_id(&self, doc: &TantivyDocument) -> Result<String, TextError> {
		doc.get_first(self.id_field)
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.ok_or_else(|| Error::Operation("indexed document has no id".to_string()).into())
	}
}

impl TranscriptSearcher for TranscriptSearchEngine {
	fn search_all(&self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
		Ok(self.find_all(query)?)
	}
}
