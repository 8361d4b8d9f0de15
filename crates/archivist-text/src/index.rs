use std::fs;
use std::path::{Path, PathBuf};
use tantivy::{doc, Index, IndexWriter};
use tracing::{debug, info, warn};

use archivist_core::types::{Catalog, ImageRecord};

use crate::error::TextError;
use crate::tantivy_utils::{build_schema, register_tokenizer, CONTENT_FIELD, ID_FIELD};

/// Directory name of the full-text index inside the cache directory.
pub const FULLTEXT_DIR: &str = "tantivy";

const DEFAULT_WRITER_MEMORY_MB: usize = 50;

const STAGING_SUFFIX: &str = "staging";
/// Holds the previous index while the new one is renamed into place.
pub(crate) const RETIRED_SUFFIX: &str = "retired";

pub fn fulltext_dir(cache_dir: &Path) -> PathBuf {
	cache_dir.join(FULLTEXT_DIR)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
	pub indexed: usize,
	pub skipped_missing: usize,
	pub skipped_unreadable: usize,
}

/// Builds the transcript index for a catalog, replacing any previous index
/// in one swap. Between the two renames of the swap the live directory is
/// briefly absent; `TranscriptSearchEngine::open` waits that out.
pub struct TranscriptIndexer {
	index_dir: PathBuf,
	writer_memory_mb: usize,
}

impl TranscriptIndexer {
	pub fn new(index_dir: PathBuf) -> Self {
		Self { index_dir, writer_memory_mb: DEFAULT_WRITER_MEMORY_MB }
	}

	pub fn with_memory_mb(mut self, mb: usize) -> Self {
		self.writer_memory_mb = mb;
		self
	}

	pub fn index_dir(&self) -> &Path { &self.index_dir }

	pub fn build(&self, catalog: &Catalog) -> Result<IndexReport, TextError> {
		let staging = self.sibling(STAGING_SUFFIX);
		if staging.exists() { fs::remove_dir_all(&staging)?; }
		fs::create_dir_all(&staging)?;
		info!(path = %staging.display(), "Creating transcript index");

		let report = self.write_index(&staging, catalog)?;
		self.swap_in(&staging)?;
		info!(
			path = %self.index_dir.display(),
			indexed = report.indexed,
			skipped_missing = report.skipped_missing,
			skipped_unreadable = report.skipped_unreadable,
			"Transcript index saved"
		);
		Ok(report)
	}

	fn write_index(&self, dir: &Path, catalog: &Catalog) -> Result<IndexReport, TextError> {
		let schema = build_schema();
		let index = Index::create_in_dir(dir, schema.clone())?;
		register_tokenizer(&index);
		let id_field = schema.get_field(ID_FIELD)?;
		let content_field = schema.get_field(CONTENT_FIELD)?;

		let mut writer: IndexWriter = index.writer(self.writer_memory_mb * 1024 * 1024)?;
		let mut report = IndexReport::default();
		let total = catalog.images.len();
		for (i, record) in catalog.images.iter().enumerate() {
			debug!("[{}/{}] {}", i + 1, total, record.path);
			let Some(txt) = transcript_path(record) else {
				debug!(path = %record.path, "Skipping, sidecar missing");
				report.skipped_missing += 1;
				continue;
			};
			match fs::read_to_string(txt) {
				Ok(content) => {
					writer.add_document(doc!(id_field => record.id.clone(), content_field => content))?;
					report.indexed += 1;
				}
				Err(e) => {
					warn!(path = %txt.display(), error = %e, "Skipping unreadable transcript");
					report.skipped_unreadable += 1;
				}
			}
		}
		writer.commit()?;
		// Merges write into the directory; they must finish before it moves.
		writer.wait_merging_threads()?;
		Ok(report)
	}

	fn swap_in(&self, staging: &Path) -> Result<(), TextError> {
		let retired = self.sibling(RETIRED_SUFFIX);
		if retired.exists() { fs::remove_dir_all(&retired)?; }
		if self.index_dir.exists() { fs::rename(&self.index_dir, &retired)?; }
		fs::rename(staging, &self.index_dir)?;
		if retired.exists() { fs::remove_dir_all(&retired)?; }
		Ok(())
	}

	fn sibling(&self, suffix: &str) -> PathBuf {
		sibling_dir(&self.index_dir, suffix)
	}
}

/// `<parent>/.<name>.<suffix>`, next to the live index so renames stay on one filesystem.
pub(crate) fn sibling_dir(index_dir: &Path, suffix: &str) -> PathBuf {
	let name = index_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| FULLTEXT_DIR.to_string());
	let parent = index_dir.parent().unwrap_or_else(|| Path::new("."));
	parent.join(format!(".{name}.{suffix}"))
}

/// The transcript to index, when both sidecars are present on disk.
fn transcript_path(record: &ImageRecord) -> Option<&Path> {
	if !record.has_sidecars() { return None; }
	let json = Path::new(&record.json_path);
	let txt = Path::new(&record.txt_path);
	(json.is_file() && txt.is_file()).then_some(txt)
}
