//! Command line surface of the archivist binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Full-text search over OCR transcripts of scanned photo albums.
#[derive(Parser, Debug)]
#[command(name = "archivist")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to config.toml plus config.<RUST_ENV>.toml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Catalog a batch and build its transcript index
    Index {
        /// Batch directory (default from config)
        batch: Option<PathBuf>,
    },

    /// Cached, resumable search; prints every matching record
    Search {
        query: String,

        #[arg(short, long)]
        batch: Option<PathBuf>,
    },

    /// Status of one cached query, or of every cached query
    Status {
        query: Option<String>,

        #[arg(short, long)]
        batch: Option<PathBuf>,
    },

    /// Uncached search printing the best hits with highlighted snippets
    Query {
        query: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        #[arg(short, long)]
        batch: Option<PathBuf>,
    },

    /// Write every transcript of a completed search into one text file
    Megadoc {
        query: String,

        #[arg(short, long)]
        batch: Option<PathBuf>,
    },

    /// Remove duplicate cache entries that lost to a more complete one
    Prune {
        #[arg(short, long)]
        batch: Option<PathBuf>,
    },
}
