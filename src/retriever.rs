//! Query-time retrieval: embed the query, search the index.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::EmbeddingService;
use crate::error::{QaError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Embeds queries and returns the most similar chunks from a [`VectorIndex`].
///
/// No absolute similarity threshold is applied: a query always gets
/// `min(top_k, index size)` hits, ranked best first.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    default_top_k: usize,
}

impl Retriever {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        default_top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            default_top_k,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Retrieve the `top_k` (or configured default) most similar chunks.
    ///
    /// An empty query is embedded and searched like any other.
    ///
    /// # Errors
    ///
    /// [`QaError::Config`] if the effective `top_k` is 0;
    /// [`QaError::ExternalService`] if the query cannot be embedded.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<RetrievalResult> {
        let k = top_k.unwrap_or(self.default_top_k);
        if k == 0 {
            return Err(QaError::config("top_k must be >= 1"));
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, k)?;
        debug!(top_k = k, hits = hits.len(), "retrieved");
        Ok(RetrievalResult::new(hits))
    }
}
