//! Query grammar for transcript search.
//!
//! Words and `"quoted phrases"` are required by default. `OR` joins
//! alternatives, `AND` is accepted and implied, `NOT` or a leading `-`
//! excludes, `+` requires, and parentheses group. `word~` matches within the
//! default edit distance, `word~2` within two edits; `"a phrase"~N` allows N
//! positions of slop. A leaf may carry the `content:` field prefix. A query
//! made only of exclusions matches every document that avoids them.
//!
//! Leaves go through the index's tokenizer, so case and stop words behave
//! exactly as they did at indexing time.

use tantivy::query::{AllQuery, BooleanQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::{TextAnalyzer, TokenStream};
use tantivy::{Index, Term};

use crate::error::TextError;
use crate::tantivy_utils::CONTENT_FIELD;

/// Largest distance tantivy builds Levenshtein automata for.
pub const MAX_FUZZY_DISTANCE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
	pub fuzzy_distance: u8,
	pub transpositions: bool,
}

impl Default for QueryOptions {
	fn default() -> Self {
		Self { fuzzy_distance: 1, transpositions: true }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
	Open,
	Close,
	And,
	Or,
	Not,
	Plus,
	Minus,
	Leaf { text: String, quoted: bool, tilde: Option<String> },
}

/// Parsed query before it meets the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Ast {
	/// A word or phrase. `fuzzy` is the edit distance of a `word~` leaf.
	Leaf { text: String, fuzzy: Option<u8>, slop: u32 },
	/// Every `Must` clause matches and no `MustNot` clause does.
	All(Vec<(Occur, Ast)>),
	Any(Vec<Ast>),
}

fn invalid(msg: impl Into<String>) -> TextError {
	TextError::InvalidQuery(msg.into())
}

fn lex(input: &str) -> Result<Vec<Token>, TextError> {
	let mut tokens = Vec::new();
	let mut chars = input.char_indices().peekable();
	while let Some(&(start, c)) = chars.peek() {
		match c {
			c if c.is_whitespace() => { chars.next(); }
			'(' => { chars.next(); tokens.push(Token::Open); }
			')' => { chars.next(); tokens.push(Token::Close); }
			'+' | '-' if starts_operand(&input[start + 1..]) => {
				chars.next();
				tokens.push(if c == '+' { Token::Plus } else { Token::Minus });
			}
			_ => {
				let (token, len) = lex_leaf(&input[start..])?;
				while chars.peek().is_some_and(|&(i, _)| i < start + len) { chars.next(); }
				tokens.push(token);
			}
		}
	}
	Ok(tokens)
}

fn starts_operand(rest: &str) -> bool {
	rest.chars().next().is_some_and(|c| !c.is_whitespace() && c != ')')
}

/// One leaf from the front of `s`, with the number of bytes it spans.
fn lex_leaf(s: &str) -> Result<(Token, usize), TextError> {
	let mut pos = 0;
	let field_len = s.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(s.len());
	let is_field = s.starts_with(|c: char| c.is_alphabetic()) && s[field_len..].starts_with(':');
	if is_field {
		let field = &s[..field_len];
		if field != CONTENT_FIELD {
			return Err(invalid(format!("unknown field '{field}'")));
		}
		pos = field_len + 1;
	}

	let rest = &s[pos..];
	if let Some(body) = rest.strip_prefix('"') {
		let end = body.find('"').ok_or_else(|| invalid("unterminated phrase"))?;
		let text = body[..end].to_string();
		pos += end + 2;
		let mut tilde = None;
		if let Some(after) = s[pos..].strip_prefix('~') {
			let digits = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
			tilde = Some(after[..digits].to_string());
			pos += 1 + digits;
		}
		return Ok((Token::Leaf { text, quoted: true, tilde }, pos));
	}

	let len = rest.find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"')).unwrap_or(rest.len());
	let word = &rest[..len];
	pos += len;
	if is_field && word.is_empty() {
		return Err(invalid(format!("nothing to search after '{}'", &s[..pos])));
	}
	let token = match (word, !is_field) {
		("AND", true) => Token::And,
		("OR", true) => Token::Or,
		("NOT", true) => Token::Not,
		_ => match word.split_once('~') {
			Some((text, tilde)) => Token::Leaf { text: text.to_string(), quoted: false, tilde: Some(tilde.to_string()) },
			None => Token::Leaf { text: word.to_string(), quoted: false, tilde: None },
		},
	};
	Ok((token, pos))
}

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
	default_distance: u8,
}

impl Parser {
	fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		self.pos += 1;
		token
	}

	fn parse_any(&mut self) -> Result<Option<Ast>, TextError> {
		let mut branches = Vec::new();
		loop {
			if let Some(branch) = self.parse_all()? { branches.push(branch); }
			if self.peek() == Some(&Token::Or) {
				self.pos += 1;
				continue;
			}
			break;
		}
		Ok(match branches.len() {
			0 => None,
			1 => branches.pop(),
			_ => Some(Ast::Any(branches)),
		})
	}

	fn parse_all(&mut self) -> Result<Option<Ast>, TextError> {
		let mut clauses = Vec::new();
		loop {
			match self.peek() {
				None | Some(Token::Close | Token::Or) => break,
				Some(Token::And) => self.pos += 1,
				Some(_) => {
					let occur = match self.peek() {
						Some(Token::Not | Token::Minus) => { self.pos += 1; Occur::MustNot }
						Some(Token::Plus) => { self.pos += 1; Occur::Must }
						_ => Occur::Must,
					};
					if let Some(node) = self.parse_primary()? { clauses.push((occur, node)); }
				}
			}
		}
		Ok(match clauses.len() {
			0 => None,
			1 if clauses[0].0 == Occur::Must => clauses.pop().map(|(_, node)| node),
			_ => Some(Ast::All(clauses)),
		})
	}

	fn parse_primary(&mut self) -> Result<Option<Ast>, TextError> {
		match self.next() {
			Some(Token::Open) => {
				let inner = self.parse_any()?;
				match self.next() {
					Some(Token::Close) => Ok(inner),
					_ => Err(invalid("unbalanced parentheses")),
				}
			}
			Some(Token::Leaf { text, quoted, tilde }) => self.leaf(text, quoted, tilde).map(Some),
			Some(Token::Close) => Err(invalid("unbalanced parentheses")),
			Some(Token::And | Token::Or | Token::Not | Token::Plus | Token::Minus) | None => {
				Err(invalid("operator without an operand"))
			}
		}
	}

	fn leaf(&self, text: String, quoted: bool, tilde: Option<String>) -> Result<Ast, TextError> {
		let Some(tilde) = tilde else { return Ok(Ast::Leaf { text, fuzzy: None, slop: 0 }) };
		if !tilde.chars().all(|c| c.is_ascii_digit()) {
			return Err(invalid(format!("bad edit distance '~{tilde}' after '{text}'")));
		}
		if quoted {
			let slop = if tilde.is_empty() { 0 } else { tilde.parse().map_err(|_| invalid(format!("bad slop '~{tilde}'")))? };
			return Ok(Ast::Leaf { text, fuzzy: None, slop });
		}
		if text.is_empty() {
			return Err(invalid("'~' needs a word before it"));
		}
		let distance = if tilde.is_empty() {
			self.default_distance
		} else {
			tilde.parse::<u8>().map_err(|_| invalid(format!("bad edit distance in '{text}~{tilde}'")))?
		};
		if distance > MAX_FUZZY_DISTANCE {
			return Err(invalid(format!("edit distance in '{text}~{tilde}' exceeds {MAX_FUZZY_DISTANCE}")));
		}
		Ok(Ast::Leaf { text, fuzzy: Some(distance), slop: 0 })
	}
}

/// `None` when the input holds nothing to match on.
pub(crate) fn parse(input: &str, default_distance: u8) -> Result<Option<Ast>, TextError> {
	let mut parser = Parser { tokens: lex(input)?, pos: 0, default_distance };
	let ast = parser.parse_any()?;
	if parser.pos < parser.tokens.len() {
		return Err(invalid("unbalanced parentheses"));
	}
	Ok(ast)
}

struct Compiler {
	field: Field,
	analyzer: TextAnalyzer,
	transpositions: bool,
}

impl Compiler {
	fn analyze(&mut self, text: &str) -> Vec<Term> {
		let mut terms = Vec::new();
		let mut stream = self.analyzer.token_stream(text);
		while stream.advance() {
			terms.push(Term::from_field_text(self.field, &stream.token().text));
		}
		terms
	}

	fn compile(&mut self, ast: &Ast) -> Result<Option<Box<dyn Query>>, TextError> {
		match ast {
			Ast::Leaf { text, fuzzy: Some(distance), .. } => {
				let mut terms = self.analyze(text);
				match terms.len() {
					0 => Ok(None),
					1 => Ok(terms.pop().map(|t| Box::new(FuzzyTermQuery::new(t, *distance, self.transpositions)) as Box<dyn Query>)),
					_ => Err(invalid(format!("'~' applies to a single word, not '{text}'"))),
				}
			}
			Ast::Leaf { text, fuzzy: None, slop } => {
				let mut terms = self.analyze(text);
				match terms.len() {
					0 => Ok(None),
					1 => Ok(terms.pop().map(|t| Box::new(TermQuery::new(t, IndexRecordOption::WithFreqs)) as Box<dyn Query>)),
					_ => {
						let mut phrase = PhraseQuery::new(terms);
						phrase.set_slop(*slop);
						Ok(Some(Box::new(phrase)))
					}
				}
			}
			Ast::All(clauses) => {
				let mut compiled: Vec<(Occur, Box<dyn Query>)> = Vec::new();
				for (occur, node) in clauses {
					if let Some(query) = self.compile(node)? { compiled.push((*occur, query)); }
				}
				if compiled.is_empty() { return Ok(None); }
				if !compiled.iter().any(|(occur, _)| *occur == Occur::Must) {
					compiled.push((Occur::Must, Box::new(AllQuery)));
				}
				if compiled.len() == 1 { return Ok(compiled.pop().map(|(_, q)| q)); }
				Ok(Some(Box::new(BooleanQuery::new(compiled))))
			}
			Ast::Any(branches) => {
				let mut compiled: Vec<(Occur, Box<dyn Query>)> = Vec::new();
				for node in branches {
					if let Some(query) = self.compile(node)? { compiled.push((Occur::Should, query)); }
				}
				match compiled.len() {
					0 => Ok(None),
					1 => Ok(compiled.pop().map(|(_, q)| q)),
					_ => Ok(Some(Box::new(BooleanQuery::new(compiled)))),
				}
			}
		}
	}
}

/// Builds the query for the content field. `None` when there is nothing to match.
pub fn build_query(index: &Index, field: Field, input: &str, options: &QueryOptions) -> Result<Option<Box<dyn Query>>, TextError> {
	let Some(ast) = parse(input, options.fuzzy_distance)? else { return Ok(None) };
	let analyzer = index.tokenizer_for_field(field)?;
	Compiler { field, analyzer, transpositions: options.transpositions }.compile(&ast)
}
