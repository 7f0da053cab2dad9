//! Error types for docqa.
//!
//! Library code returns [`Result<T>`] carrying a typed [`QaError`]. The
//! binary wraps these in `anyhow` at the top level, which is the only place
//! errors are reported to the user.
//!
//! | Variant | Meaning | Recovery |
//! |---------|---------|----------|
//! | [`QaError::Config`] | Missing or invalid setting, no chunks when required | Fatal |
//! | [`QaError::NotFound`] | Persisted index absent | Fallback build |
//! | [`QaError::CorruptIndex`] | Persisted index unreadable | Fallback build |
//! | [`QaError::ExternalService`] | Embedding or completion call failed | Retry whole operation |

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the ingestion, indexing, and answering pipeline.
#[derive(Debug, Error)]
pub enum QaError {
    /// A required setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No persisted index exists at the given location.
    #[error("No persisted index at {}", .0.display())]
    NotFound(PathBuf),

    /// A persisted index exists but cannot be trusted.
    #[error("Persisted index at {} is corrupt: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// An embedding or language model call failed.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl QaError {
    pub fn config(msg: impl Into<String>) -> Self {
        QaError::Config(msg.into())
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        QaError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// True for the two "no usable index on disk" kinds that trigger a rebuild.
    pub fn is_missing_index(&self) -> bool {
        matches!(self, QaError::NotFound(_) | QaError::CorruptIndex { .. })
    }
}

/// Why [`VectorIndex::load`](crate::index::VectorIndex::load) produced no index.
///
/// Both variants mean "build instead"; they are kept apart so that
/// diagnostics can tell an empty storage location from a damaged one.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no index stored at {}", .0.display())]
    NotFound(PathBuf),

    #[error("index at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl From<LoadError> for QaError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::NotFound(path) => QaError::NotFound(path),
            LoadError::Corrupt { path, reason } => QaError::CorruptIndex { path, reason },
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;
