//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! that indexes `./docs` into `./storage`. The parsed [`Config`] is passed
//! explicitly to the components that need it; nothing is stored globally.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{QaError, Result};
use crate::synth::ResponseMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            root: default_docs_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_docs_root() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub response_mode: ResponseMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            response_mode: ResponseMode::default(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Characters of retrieved context allowed in a single prompt.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            context_window: default_context_window(),
            url: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_context_window() -> usize {
    12_000
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}

impl Config {
    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(QaError::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(QaError::config(format!(
                "chunking.chunk_overlap ({}) must be less than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        if self.retrieval.top_k < 1 {
            return Err(QaError::config("retrieval.top_k must be >= 1"));
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" | "hash" => {}
            other => {
                return Err(QaError::config(format!(
                    "Unknown embedding provider: '{}'. Must be openai, ollama, local, or hash.",
                    other
                )))
            }
        }
        if self.embedding.dims == Some(0) {
            return Err(QaError::config("embedding.dims must be > 0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(QaError::config("embedding.batch_size must be > 0"));
        }
        if self.embedding.concurrency == 0 {
            return Err(QaError::config("embedding.concurrency must be > 0"));
        }

        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => {
                return Err(QaError::config(format!(
                    "Unknown llm provider: '{}'. Must be openai or ollama.",
                    other
                )))
            }
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(QaError::config("llm.temperature must be in [0.0, 2.0]"));
        }
        if self.llm.context_window == 0 {
            return Err(QaError::config("llm.context_window must be > 0"));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        QaError::config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| QaError::config(format!("Failed to parse config file: {}", e)))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.chunk_overlap, 50);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.retrieval.response_mode, ResponseMode::Compact);
        assert_eq!(cfg.storage.dir, PathBuf::from("./storage"));
        assert_eq!(cfg.llm.model, "gpt-3.5-turbo");
    }

    #[test]
    fn parses_response_mode() {
        let cfg: Config = toml::from_str(
            r#"
[retrieval]
top_k = 5
response_mode = "tree_summarize"
"#,
        )
        .unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.response_mode, ResponseMode::TreeSummarize);
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let cfg: Config = toml::from_str(
            r#"
[chunking]
chunk_size = 100
chunk_overlap = 100
"#,
        )
        .unwrap();
        assert!(matches!(cfg.validate(), Err(QaError::Config(_))));
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut cfg = Config::default();
        cfg.retrieval.top_k = 0;
        assert!(matches!(cfg.validate(), Err(QaError::Config(_))));
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut cfg = Config::default();
        cfg.embedding.provider = "word2vec".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("word2vec"));
    }

    #[test]
    fn rejects_unknown_response_mode() {
        let parsed: std::result::Result<Config, _> = toml::from_str(
            r#"
[retrieval]
response_mode = "accumulate"
"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }
}
