//! # docqa CLI
//!
//! Ask questions about a directory of local documents.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ask "<question>"` | Retrieve relevant passages and synthesize an answer |
//! | `docqa retrieve "<query>"` | Print the top passages without calling the language model |
//! | `docqa build` | Load the stored index, or ingest documents and build it |
//! | `docqa rebuild` | Delete the stored index; the next `ask`/`build` rebuilds it |
//! | `docqa stats` | Summarize the stored index |
//!
//! ## Examples
//!
//! ```bash
//! # Answer with the default (compact) response mode
//! docqa ask "How do I reset my password?"
//!
//! # Five passages, refined one at a time
//! docqa ask "What are the rate limits?" --top-k 5 --mode refine
//!
//! # Force re-ingestion after editing the docs
//! docqa rebuild && docqa build
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::ask;
use docqa::config;
use docqa::engine::AskOptions;
use docqa::progress::ProgressMode;
use docqa::synth::ResponseMode;

/// docqa: answer questions about local documents with retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Answer questions about local documents with retrieval-augmented generation",
    version,
    long_about = "docqa reads Markdown and text files, splits them into overlapping chunks, \
    embeds them into a persisted vector index, and answers questions by retrieving the most \
    similar passages and asking a language model to synthesize an answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Build progress on stderr: human, json, or off. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed documents.
    ///
    /// Builds the index first if none is stored.
    Ask {
        question: String,

        /// Number of passages to retrieve (default: retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Response mode: compact, refine, tree_summarize, or no_context.
        #[arg(long)]
        mode: Option<ResponseMode>,

        /// Do not list sources after the answer.
        #[arg(long)]
        no_sources: bool,

        /// Show retrieved passages with scores and debug logging.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Print the most similar passages without calling the language model.
    Retrieve {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Load the stored index, or ingest documents and build it now.
    Build,

    /// Delete the stored index.
    ///
    /// The index is not rebuilt immediately; the next `ask` or `build`
    /// ingests the documents again.
    Rebuild,

    /// Show chunk count, model, and size of the stored index.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "docqa=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Ask { verbose: true, .. });
    init_tracing(verbose);

    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            question,
            top_k,
            mode,
            no_sources,
            verbose,
        } => {
            let options = AskOptions { top_k, mode };
            ask::run_ask(&cfg, &question, options, !no_sources, verbose, progress).await?;
        }
        Commands::Retrieve { query, top_k } => {
            ask::run_retrieve(&cfg, &query, top_k, progress).await?;
        }
        Commands::Build => {
            ask::run_build(&cfg, progress).await?;
        }
        Commands::Rebuild => {
            ask::run_rebuild(&cfg)?;
        }
        Commands::Stats => {
            ask::run_stats(&cfg)?;
        }
    }

    Ok(())
}
