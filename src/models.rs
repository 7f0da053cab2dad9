//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, retrieval results, and
//! answers that flow through the ingestion and question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::synth::ResponseMode;

/// Metadata key holding the source identifier (relative file path).
pub const SOURCE_KEY: &str = "source";

/// Metadata key holding the bare file name.
pub const FILE_NAME_KEY: &str = "file_name";

/// A loaded document. Immutable once produced by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Build a document whose id doubles as its source identifier.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY.to_string(), id.clone());
        Self {
            id,
            text: text.into(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A contiguous span of one document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    /// Copied verbatim from the parent document.
    pub metadata: BTreeMap<String, String>,
    /// Character offset of the first character in the parent text.
    pub start_char: usize,
    /// Character offset one past the last character in the parent text.
    pub end_char: usize,
    pub hash: String,
}

impl Chunk {
    /// The identifier shown to users when citing this chunk.
    pub fn source_identifier(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .or_else(|| self.metadata.get(FILE_NAME_KEY))
            .map(String::as_str)
            .unwrap_or(&self.document_id)
    }
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Chunks returned for a query, best first, at most `top_k` long.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(hits: Vec<ScoredChunk>) -> Self {
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.hits
            .iter()
            .map(|h| Source {
                identifier: h.chunk.source_identifier().to_string(),
                score: h.score,
            })
            .collect()
    }
}

/// A cited source in an [`Answer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub identifier: String,
    pub score: f32,
}

/// A synthesized answer plus the retrieval that produced it.
///
/// `retrieval` is always present; it is empty when nothing was retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub retrieval: RetrievalResult,
    pub mode: ResponseMode,
    /// Number of language model calls made to produce `response`.
    pub llm_calls: usize,
}

impl Answer {
    pub fn sources(&self) -> Vec<Source> {
        self.retrieval.sources()
    }
}
