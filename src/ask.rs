//! CLI command runners.
//!
//! Each `run_*` function backs one `docqa` subcommand. Answers and results
//! go to stdout; progress and logs go to stderr.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::chunk_documents;
use crate::config::Config;
use crate::connector_fs::load_documents;
use crate::embedding::create_provider;
use crate::engine::{AskOptions, QaEngine};
use crate::error::QaError;
use crate::index::VectorIndex;
use crate::lifecycle::{clear_storage, IndexManager};
use crate::llm::create_llm;
use crate::models::{Answer, Chunk, RetrievalResult};
use crate::progress::{BuildProgressEvent, ProgressMode};
use crate::retriever::Retriever;

/// Read and chunk the configured document root.
pub fn load_chunks(config: &Config, progress: ProgressMode) -> crate::error::Result<Vec<Chunk>> {
    let documents = load_documents(&config.docs)?;
    progress.reporter().report(BuildProgressEvent::Chunking {
        documents: documents.len() as u64,
    });
    chunk_documents(
        &documents,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    )
}

fn manager(config: &Config, progress: ProgressMode) -> Result<IndexManager> {
    let embedder = create_provider(&config.embedding)?;
    Ok(IndexManager::from_config(config, embedder).with_progress(progress.reporter()))
}

/// `docqa ask`: answer a question, printing the response and its sources.
pub async fn run_ask(
    config: &Config,
    question: &str,
    options: AskOptions,
    show_sources: bool,
    verbose: bool,
    progress: ProgressMode,
) -> Result<()> {
    let llm = create_llm(&config.llm)?;
    let manager = manager(config, progress)?;
    let engine = QaEngine::open(config, &manager, llm, || load_chunks(config, progress)).await?;

    let answer = engine
        .ask_with(question, options)
        .await
        .context("failed to answer question")?;

    print!("{}", render_answer(&answer, show_sources, verbose));
    Ok(())
}

/// The response, then either the source list or, with `verbose`, every
/// retrieved passage. `show_sources == false` suppresses both.
fn render_answer(answer: &Answer, show_sources: bool, verbose: bool) -> String {
    let mut out = format!("{}\n", answer.response);
    if !show_sources || answer.retrieval.is_empty() {
        return out;
    }

    if verbose {
        let _ = writeln!(
            out,
            "\nRetrieved passages ({} mode, {} LLM calls):",
            answer.mode, answer.llm_calls
        );
        out.push_str(&format_hits(&answer.retrieval));
    } else {
        out.push_str("\nSources:\n");
        for (i, source) in answer.sources().iter().enumerate() {
            let _ = writeln!(out, "  {}. [{:.2}] {}", i + 1, source.score, source.identifier);
        }
    }
    out
}

/// `docqa retrieve`: print the top passages without calling the language model.
pub async fn run_retrieve(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let manager = manager(config, progress)?;
    let index = manager
        .create_or_load_with(|| load_chunks(config, progress))
        .await?;
    let retriever = Retriever::new(Arc::new(index), manager.embedder(), config.retrieval.top_k);

    let result = retriever.retrieve(query, top_k).await?;
    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print!("{}", format_hits(&result));
    Ok(())
}

fn format_hits(result: &RetrievalResult) -> String {
    let mut out = String::new();
    for (i, hit) in result.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{:.4}] {} (chunk {})",
            i + 1,
            hit.score,
            hit.chunk.source_identifier(),
            hit.chunk.chunk_index
        );
        let _ = writeln!(out, "    excerpt: \"{}\"", excerpt(&hit.chunk.text, 200));
        let _ = writeln!(out, "    id: {}", hit.chunk.id);
        let _ = writeln!(out);
    }
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// `docqa build`: load the stored index, or ingest and build one now.
pub async fn run_build(config: &Config, progress: ProgressMode) -> Result<()> {
    let manager = manager(config, progress)?;
    let index = manager
        .create_or_load_with(|| load_chunks(config, progress))
        .await?;
    println!(
        "Index ready: {} chunks ({}, {} dims) at {}",
        index.len(),
        index.model(),
        index.dims(),
        manager.storage_dir().display()
    );
    Ok(())
}

/// `docqa rebuild`: delete stored index. The next `ask` or `build` rebuilds it.
pub fn run_rebuild(config: &Config) -> Result<()> {
    let dir = &config.storage.dir;
    if clear_storage(dir)? {
        println!(
            "Cleared index at {}. It will be rebuilt on the next ask or build.",
            dir.display()
        );
    } else {
        println!("No index stored at {}.", dir.display());
    }
    Ok(())
}

/// `docqa stats`: summarize the stored index.
pub fn run_stats(config: &Config) -> Result<()> {
    let dir = &config.storage.dir;
    let index = match VectorIndex::open(dir) {
        Ok(index) => index,
        Err(QaError::NotFound(_)) => {
            println!("No index stored at {}.", dir.display());
            return Ok(());
        }
        Err(e) if e.is_missing_index() => {
            println!("{}", e);
            println!("Run `docqa rebuild` and then `docqa build` to recreate it.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let documents: BTreeSet<&str> = index
        .chunks()
        .iter()
        .map(|c| c.document_id.as_str())
        .collect();

    println!("docqa index stats");
    println!("=================");
    println!();
    println!("  Storage:     {}", dir.display());
    println!("  Size:        {}", format_bytes(dir_size(dir)));
    println!();
    println!("  Documents:   {}", documents.len());
    println!("  Chunks:      {}", index.len());
    println!("  Model:       {}", index.model());
    println!("  Dimensions:  {}", index.dims());
    println!();
    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoredChunk;
    use crate::synth::ResponseMode;

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\nb", 10), "a b");
        assert_eq!(excerpt("abcdefghij klm", 10), "abcdefghij...");
    }

    fn answer(texts: &[&str]) -> Answer {
        let hits = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ScoredChunk {
                chunk: Chunk {
                    id: format!("c{}", i),
                    document_id: format!("doc{}.md", i),
                    chunk_index: 0,
                    text: t.to_string(),
                    metadata: Default::default(),
                    start_char: 0,
                    end_char: t.len(),
                    hash: String::new(),
                },
                score: 0.9,
            })
            .collect();
        Answer {
            response: "Click forgot password.".to_string(),
            retrieval: RetrievalResult::new(hits),
            mode: ResponseMode::Compact,
            llm_calls: 1,
        }
    }

    #[test]
    fn render_answer_lists_sources_or_passages() {
        let a = answer(&["reset steps"]);
        let plain = render_answer(&a, true, false);
        assert!(plain.starts_with("Click forgot password.\n"));
        assert!(plain.contains("Sources:\n  1. [0.90] doc0.md"));
        assert!(!plain.contains("excerpt"));

        let verbose = render_answer(&a, true, true);
        assert!(verbose.contains("Retrieved passages (compact mode, 1 LLM calls):"));
        assert!(verbose.contains("excerpt: \"reset steps\""));
    }

    #[test]
    fn render_answer_no_sources_wins_over_verbose() {
        let a = answer(&["reset steps"]);
        assert_eq!(render_answer(&a, false, true), "Click forgot password.\n");
        assert_eq!(render_answer(&a, false, false), "Click forgot password.\n");
        assert_eq!(render_answer(&answer(&[]), true, true), "Click forgot password.\n");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
