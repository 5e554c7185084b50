//! Technical knowledge base backing the RAG lookups.
//!
//! A [`KnowledgeBase`] is an immutable snapshot of documents. [`KnowledgeStore`] hands
//! out the current snapshot and swaps in a new one atomically on reload.

pub mod base;
pub mod document;
pub mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use base::{CompatibilityReport, KnowledgeBase, KnowledgeOrigin, SearchQuery, SpecificationSheet};
pub use document::{metadata_from_filename, RagDocument};
pub use store::KnowledgeStore;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("could not read knowledge file `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse knowledge store `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("could not write knowledge store `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("could not encode knowledge store: {0}")]
    Encode(#[from] serde_json::Error),
}
