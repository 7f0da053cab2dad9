//! The query pipeline: retrieve, then synthesize.
//!
//! ```text
//! question ──▶ Retriever (embed + search) ──▶ Synthesizer (mode) ──▶ Answer
//! ```

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::lifecycle::IndexManager;
use crate::llm::LanguageModel;
use crate::models::{Answer, Chunk, RetrievalResult};
use crate::retriever::Retriever;
use crate::synth::{ResponseMode, Synthesizer};

/// Per-question overrides of the configured retrieval settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub mode: Option<ResponseMode>,
}

/// A ready-to-query pipeline over one index generation.
pub struct QaEngine {
    retriever: Retriever,
    synthesizer: Synthesizer,
    default_mode: ResponseMode,
}

impl QaEngine {
    pub fn new(retriever: Retriever, synthesizer: Synthesizer, default_mode: ResponseMode) -> Self {
        Self {
            retriever,
            synthesizer,
            default_mode,
        }
    }

    /// Load or build the index through `manager` and wire up the pipeline.
    ///
    /// `chunks` is only called when no stored index can be used.
    pub async fn open<F>(
        config: &Config,
        manager: &IndexManager,
        llm: Arc<dyn LanguageModel>,
        chunks: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<Vec<Chunk>>,
    {
        let index = manager.create_or_load_with(chunks).await?;
        Ok(Self::from_index(config, Arc::new(index), manager, llm))
    }

    pub fn from_index(
        config: &Config,
        index: Arc<VectorIndex>,
        manager: &IndexManager,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let retriever = Retriever::new(index, manager.embedder(), config.retrieval.top_k);
        let synthesizer = Synthesizer::from_config(llm, &config.llm);
        Self::new(retriever, synthesizer, config.retrieval.response_mode)
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` with the configured `top_k` and response mode.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.ask_with(question, AskOptions::default()).await
    }

    pub async fn ask_with(&self, question: &str, options: AskOptions) -> Result<Answer> {
        let retrieval = self.retrieve(question, options.top_k).await?;
        let mode = options.mode.unwrap_or(self.default_mode);
        let answer = self.synthesizer.synthesize(question, retrieval, mode).await?;
        info!(
            mode = %answer.mode,
            sources = answer.retrieval.len(),
            llm_calls = answer.llm_calls,
            "answered question"
        );
        Ok(answer)
    }

    /// Retrieval only, without calling the language model.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<RetrievalResult> {
        self.retriever.retrieve(query, top_k).await
    }
}
