use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const ID_FIELD: &str = "id";
pub const CONTENT_FIELD: &str = "content";
pub const TOKENIZER: &str = "transcript";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(ID_FIELD, STRING | STORED);
	let content_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let content_options = TextOptions::default().set_indexing_options(content_indexing).set_stored();
	schema_builder.add_text_field(CONTENT_FIELD, content_options);
	schema_builder.build()
}

/// Words too common in letters and captions to be worth matching on.
const STOP_WORDS: &[&str] = &[
	"a", "an", "and", "are", "as", "at", "be", "by", "can", "for", "from", "have", "if", "in", "is", "it", "may",
	"not", "of", "on", "or", "that", "the", "this", "to", "us", "we", "when", "will", "with", "yet", "you", "your",
];

/// Transcripts are OCR output, so very long tokens are scanner noise.
const MAX_TOKEN_LEN: usize = 40;

pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| (*s).to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}
