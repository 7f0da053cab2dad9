//! Answer synthesis over retrieved chunks.
//!
//! The [`Synthesizer`] turns a query and a [`RetrievalResult`] into an
//! [`Answer`] using one of four strategies:
//!
//! | Mode | Calls | Behavior |
//! |------|-------|----------|
//! | [`ResponseMode::Compact`] | one per context window | Pack as many chunks as fit into one prompt; overflow windows refine the running answer |
//! | [`ResponseMode::Refine`] | one per chunk | Answer from the first chunk, then refine sequentially with each following chunk |
//! | [`ResponseMode::TreeSummarize`] | shrinking per round | Summarize groups, then summaries of summaries, until one answer remains |
//! | [`ResponseMode::NoContext`] | one | Ask the model directly; used whenever nothing was retrieved |
//!
//! The context budget is measured in characters (`llm.context_window`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{QaError, Result};
use crate::llm::LanguageModel;
use crate::models::{Answer, RetrievalResult};

/// Strategy used to compose an answer from retrieved chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Compact,
    Refine,
    TreeSummarize,
    NoContext,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Compact => "compact",
            ResponseMode::Refine => "refine",
            ResponseMode::TreeSummarize => "tree_summarize",
            ResponseMode::NoContext => "no_context",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "compact" => Ok(ResponseMode::Compact),
            "refine" => Ok(ResponseMode::Refine),
            "tree_summarize" => Ok(ResponseMode::TreeSummarize),
            "no_context" => Ok(ResponseMode::NoContext),
            other => Err(format!(
                "unknown response mode '{}': expected compact, refine, tree_summarize, or no_context",
                other
            )),
        }
    }
}

const QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: ";

const REFINE_TEMPLATE: &str = "The original query is as follows: {query}\n\
We have provided an existing answer: {existing}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n\
{context}\n\
------------\n\
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.\n\
Refined Answer: ";

const SUMMARY_TEMPLATE: &str = "Context information from multiple sources is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the information from multiple sources and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: ";

const NO_CONTEXT_TEMPLATE: &str = "Answer the following query. \
If you do not have enough information to answer, say so.\n\
Query: {query}\n\
Answer: ";

const SEPARATOR: &str = "\n\n";

/// Substitute `{name}` placeholders in a single left-to-right pass.
/// Inserted values are never rescanned, so text that itself contains
/// `{query}` or `{context}` reaches the model verbatim.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = values.iter().find(|(name, _)| {
            tail[1..].starts_with(name) && tail[1 + name.len()..].starts_with('}')
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn qa_prompt(query: &str, context: &str) -> String {
    fill(QA_TEMPLATE, &[("context", context), ("query", query)])
}

fn refine_prompt(query: &str, existing: &str, context: &str) -> String {
    fill(
        REFINE_TEMPLATE,
        &[("existing", existing), ("context", context), ("query", query)],
    )
}

fn summary_prompt(query: &str, context: &str) -> String {
    fill(SUMMARY_TEMPLATE, &[("context", context), ("query", query)])
}

fn no_context_prompt(query: &str) -> String {
    fill(NO_CONTEXT_TEMPLATE, &[("query", query)])
}

/// Composes answers by prompting a [`LanguageModel`].
pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    temperature: f32,
    context_window: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, temperature: f32, context_window: usize) -> Self {
        Self {
            llm,
            temperature,
            context_window: context_window.max(1),
        }
    }

    pub fn from_config(llm: Arc<dyn LanguageModel>, config: &LlmConfig) -> Self {
        Self::new(llm, config.temperature, config.context_window)
    }

    /// Answer `query` from `retrieval` using `mode`.
    ///
    /// An empty retrieval always runs as [`ResponseMode::NoContext`]. The
    /// returned answer carries `retrieval` unchanged.
    ///
    /// # Errors
    ///
    /// [`QaError::ExternalService`] if any completion call fails or returns
    /// blank text. No partial answer is returned.
    pub async fn synthesize(
        &self,
        query: &str,
        retrieval: RetrievalResult,
        mode: ResponseMode,
    ) -> Result<Answer> {
        let mode = if retrieval.is_empty() {
            ResponseMode::NoContext
        } else {
            mode
        };
        let texts: Vec<&str> = retrieval.iter().map(|h| h.chunk.text.as_str()).collect();
        let mut calls = 0usize;

        let response = match mode {
            ResponseMode::NoContext => self.call(&no_context_prompt(query), &mut calls).await?,
            ResponseMode::Compact => self.compact(query, &texts, &mut calls).await?,
            ResponseMode::Refine => self.refine(query, &texts, &mut calls).await?,
            ResponseMode::TreeSummarize => self.tree_summarize(query, &texts, &mut calls).await?,
        };

        debug!(mode = %mode, llm_calls = calls, chunks = retrieval.len(), "synthesized answer");
        Ok(Answer {
            response,
            retrieval,
            mode,
            llm_calls: calls,
        })
    }

    async fn compact(&self, query: &str, texts: &[&str], calls: &mut usize) -> Result<String> {
        let windows = pack(texts, self.context_window, 1);
        self.refine_over(query, &windows, calls).await
    }

    async fn refine(&self, query: &str, texts: &[&str], calls: &mut usize) -> Result<String> {
        let windows: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        self.refine_over(query, &windows, calls).await
    }

    /// First context gets the QA prompt; each later one refines the running answer.
    async fn refine_over(&self, query: &str, contexts: &[String], calls: &mut usize) -> Result<String> {
        let mut answer: Option<String> = None;
        for context in contexts {
            let prompt = match &answer {
                None => qa_prompt(query, context),
                Some(existing) => refine_prompt(query, existing, context),
            };
            answer = Some(self.call(&prompt, calls).await?);
        }
        match answer {
            Some(a) => Ok(a),
            None => self.call(&no_context_prompt(query), calls).await,
        }
    }

    async fn tree_summarize(&self, query: &str, texts: &[&str], calls: &mut usize) -> Result<String> {
        let mut level: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        loop {
            let refs: Vec<&str> = level.iter().map(String::as_str).collect();
            let groups = pack(&refs, self.context_window, 2);
            let mut summaries = Vec::with_capacity(groups.len());
            for group in &groups {
                summaries.push(self.call(&summary_prompt(query, group), calls).await?);
            }
            debug!(groups = groups.len(), "tree_summarize round");
            if summaries.len() <= 1 {
                return match summaries.pop() {
                    Some(s) => Ok(s),
                    None => self.call(&no_context_prompt(query), calls).await,
                };
            }
            level = summaries;
        }
    }

    async fn call(&self, prompt: &str, calls: &mut usize) -> Result<String> {
        *calls += 1;
        let text = self.llm.complete(prompt, self.temperature).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(QaError::external(
                self.llm.model_name(),
                "language model returned an empty completion",
            ));
        }
        Ok(text.to_string())
    }
}

/// Greedily join `texts` into groups whose joined length fits `budget`.
///
/// A text longer than the budget still forms a group. Every group holds at
/// least `min_items` texts when that many remain; a short tail is merged
/// into the previous group, so with `min_items >= 2` and two or more texts
/// the result always has fewer groups than inputs.
fn pack(texts: &[&str], budget: usize, min_items: usize) -> Vec<String> {
    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for &text in texts {
        let len = text.chars().count();
        let added = if current.is_empty() {
            len
        } else {
            len + SEPARATOR.len()
        };
        if !current.is_empty() && current.len() >= min_items && current_len + added > budget {
            groups.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += if current.is_empty() {
            len
        } else {
            len + SEPARATOR.len()
        };
        current.push(text);
    }

    if !current.is_empty() {
        match groups.last_mut() {
            Some(last) if current.len() < min_items => last.extend(current),
            _ => groups.push(current),
        }
    }

    groups.into_iter().map(|g| g.join(SEPARATOR)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns "answer-N" for the N-th call and records every prompt.
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingLlm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(format!("answer-{}", prompts.len()))
        }
    }

    struct BlankLlm;

    #[async_trait]
    impl LanguageModel for BlankLlm {
        fn model_name(&self) -> &str {
            "blank"
        }
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok("   \n".to_string())
        }
    }

    fn retrieval(texts: &[&str]) -> RetrievalResult {
        RetrievalResult::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| ScoredChunk {
                    chunk: Chunk {
                        id: format!("c{}", i),
                        document_id: format!("doc{}", i),
                        chunk_index: 0,
                        text: t.to_string(),
                        metadata: Default::default(),
                        start_char: 0,
                        end_char: t.len(),
                        hash: String::new(),
                    },
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect(),
        )
    }

    #[test]
    fn response_mode_parse_and_display() {
        assert_eq!("tree_summarize".parse::<ResponseMode>().unwrap(), ResponseMode::TreeSummarize);
        assert_eq!("no-context".parse::<ResponseMode>().unwrap(), ResponseMode::NoContext);
        assert!("accumulate".parse::<ResponseMode>().is_err());
        assert_eq!(ResponseMode::Refine.to_string(), "refine");
        assert_eq!(ResponseMode::default(), ResponseMode::Compact);
    }

    #[test]
    fn pack_respects_budget_and_min_items() {
        assert_eq!(pack(&["aaaa", "bbbb", "cccc"], 100, 1), vec!["aaaa\n\nbbbb\n\ncccc"]);
        assert_eq!(pack(&["aaaa", "bbbb", "cccc"], 5, 1), vec!["aaaa", "bbbb", "cccc"]);
        assert_eq!(pack(&["aaaa", "bbbb", "cccc"], 5, 2), vec!["aaaa\n\nbbbb\n\ncccc"]);
        assert_eq!(
            pack(&["aaaa", "bbbb", "cccc", "dddd"], 5, 2),
            vec!["aaaa\n\nbbbb", "cccc\n\ndddd"]
        );
    }

    #[test]
    fn prompts_keep_placeholder_text_in_inserted_values() {
        let prompt = qa_prompt("How do I search?", "GET /search?q={query} returns hits");
        assert!(prompt.contains("GET /search?q={query} returns hits"));
        assert!(prompt.contains("Query: How do I search?"));

        let prompt = refine_prompt("q", "Use the {context} field", "NEWCTX {existing}");
        assert!(prompt.contains("existing answer: Use the {context} field"));
        assert!(prompt.contains("NEWCTX {existing}"));

        let prompt = summary_prompt("{context}", "body");
        assert!(prompt.contains("Query: {context}"));
        assert_eq!(prompt.matches("body").count(), 1);
    }

    #[test]
    fn fill_leaves_unknown_braces_alone() {
        assert_eq!(fill("{a} {b} {", &[("a", "x")]), "x {b} {");
        assert_eq!(fill("{{a}}", &[("a", "x")]), "{x}");
    }

    #[tokio::test]
    async fn compact_uses_one_call_when_everything_fits() {
        let llm = RecordingLlm::new();
        let synth = Synthesizer::new(llm.clone(), 0.1, 10_000);
        let answer = synth
            .synthesize("q?", retrieval(&["alpha", "beta", "gamma"]), ResponseMode::Compact)
            .await
            .unwrap();

        assert_eq!(answer.llm_calls, 1);
        assert_eq!(answer.response, "answer-1");
        let prompts = llm.prompts();
        assert!(prompts[0].contains("alpha\n\nbeta\n\ngamma"));
        assert!(prompts[0].contains("Query: q?"));
    }

    #[tokio::test]
    async fn compact_overflow_refines_across_windows() {
        let llm = RecordingLlm::new();
        let synth = Synthesizer::new(llm.clone(), 0.1, 12);
        let answer = synth
            .synthesize("q?", retrieval(&["alpha", "beta", "gamma"]), ResponseMode::Compact)
            .await
            .unwrap();

        assert_eq!(answer.llm_calls, 2);
        let prompts = llm.prompts();
        assert!(prompts[0].contains("alpha\n\nbeta"));
        assert!(prompts[1].contains("existing answer: answer-1"));
        assert!(prompts[1].contains("gamma"));
    }

    #[tokio::test]
    async fn refine_is_sequential_one_call_per_chunk() {
        let llm = RecordingLlm::new();
        let synth = Synthesizer::new(llm.clone(), 0.1, 10_000);
        let answer = synth
            .synthesize("q?", retrieval(&["first", "second", "third"]), ResponseMode::Refine)
            .await
            .unwrap();

        assert_eq!(answer.llm_calls, 3);
        assert_eq!(answer.response, "answer-3");
        let prompts = llm.prompts();
        assert!(prompts[0].contains("first") && !prompts[0].contains("existing answer"));
        assert!(prompts[1].contains("second") && prompts[1].contains("existing answer: answer-1"));
        assert!(prompts[2].contains("third") && prompts[2].contains("existing answer: answer-2"));
    }

    #[tokio::test]
    async fn tree_summarize_reduces_until_one_answer() {
        let llm = RecordingLlm::new();
        // Budget fits two 4-char texts per group.
        let synth = Synthesizer::new(llm.clone(), 0.1, 10);
        let answer = synth
            .synthesize(
                "q?",
                retrieval(&["aaaa", "bbbb", "cccc", "dddd"]),
                ResponseMode::TreeSummarize,
            )
            .await
            .unwrap();

        // Round 1: two groups. Round 2: one group of the two summaries.
        assert_eq!(answer.llm_calls, 3);
        assert_eq!(answer.response, "answer-3");
        let prompts = llm.prompts();
        assert!(prompts[2].contains("answer-1\n\nanswer-2"));
    }

    #[tokio::test]
    async fn empty_retrieval_runs_without_context() {
        let llm = RecordingLlm::new();
        let synth = Synthesizer::new(llm.clone(), 0.1, 10_000);
        let answer = synth
            .synthesize("anything?", RetrievalResult::default(), ResponseMode::Refine)
            .await
            .unwrap();

        assert_eq!(answer.mode, ResponseMode::NoContext);
        assert_eq!(answer.llm_calls, 1);
        assert!(answer.retrieval.is_empty());
        assert!(!answer.response.is_empty());
        assert!(!llm.prompts()[0].contains("Context information"));
    }

    #[tokio::test]
    async fn answer_carries_retrieval() {
        let llm = RecordingLlm::new();
        let synth = Synthesizer::new(llm, 0.1, 10_000);
        let r = retrieval(&["alpha", "beta"]);
        let answer = synth
            .synthesize("q?", r.clone(), ResponseMode::Compact)
            .await
            .unwrap();
        assert_eq!(answer.retrieval, r);
        assert_eq!(answer.sources().len(), 2);
    }

    #[tokio::test]
    async fn blank_completion_is_an_error() {
        let synth = Synthesizer::new(Arc::new(BlankLlm), 0.1, 10_000);
        let err = synth
            .synthesize("q?", retrieval(&["alpha"]), ResponseMode::Compact)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::ExternalService { .. }));
    }

    /// Answers with text that looks like a template placeholder.
    struct BraceLlm;

    #[async_trait]
    impl LanguageModel for BraceLlm {
        fn model_name(&self) -> &str {
            "brace"
        }
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
            assert!(!prompt.contains("NEWCTX field"));
            Ok("Use the {context} field".to_string())
        }
    }

    #[tokio::test]
    async fn refine_passes_previous_answer_through_unchanged() {
        let synth = Synthesizer::new(Arc::new(BraceLlm), 0.1, 10_000);
        let answer = synth
            .synthesize("q?", retrieval(&["first", "NEWCTX"]), ResponseMode::Refine)
            .await
            .unwrap();
        assert_eq!(answer.llm_calls, 2);
        assert_eq!(answer.response, "Use the {context} field");
    }
}
