//! # docqa
//!
//! Question answering over a directory of local documents.
//!
//! Documents are split into overlapping chunks, embedded, and stored in a
//! persisted vector index. A question is embedded, the most similar chunks
//! are retrieved, and a language model synthesizes an answer from them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌──────────────┐
//! │ Filesystem │──▶│ Chunker │──▶│ Vector index │◀── load / persist ──▶ storage/
//! └────────────┘   └─────────┘   └──────┬───────┘
//!                                       │ search
//!                    question ──▶ ┌─────▼─────┐   ┌─────────────┐
//!                                 │ Retriever │──▶│ Synthesizer │──▶ Answer + sources
//!                                 └───────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa build                               # ingest ./docs into ./storage
//! docqa ask "How do I reset my password?"
//! docqa ask "Summarize the API" --mode tree_summarize
//! docqa rebuild                             # drop the index; rebuilt on next ask
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error kinds |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Filesystem document reader |
//! | [`chunk`] | Sentence-aware chunking with overlap |
//! | [`embedding`] | Embedding service abstraction |
//! | [`llm`] | Language model service abstraction |
//! | [`index`] | Vector index, search, and persistence |
//! | [`progress`] | Build progress reporting |
//! | [`lifecycle`] | Load-or-build and clear of the stored index |
//! | [`retriever`] | Query embedding and top-k search |
//! | [`synth`] | Response modes and answer synthesis |
//! | [`engine`] | The `ask` pipeline |
//! | [`ask`] | CLI command runners |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod engine;
pub mod error;
mod http;
pub mod index;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod progress;
pub mod retriever;
pub mod synth;
