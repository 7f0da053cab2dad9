//! Index lifecycle: load from storage, else build and persist.
//!
//! [`IndexManager::create_or_load`] never rebuilds an index that loads
//! successfully, even when the supplied chunks differ from what is stored.
//! Detecting stale storage is the caller's job; `docqa rebuild` exists
//! for that.
//!
//! [`IndexManager::clear_index`] only deletes storage. The rebuild happens
//! on the next `create_or_load` that is given chunks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingService;
use crate::error::{LoadError, QaError, Result};
use crate::index::{BuildOptions, VectorIndex};
use crate::models::Chunk;
use crate::progress::{BuildProgressEvent, BuildProgressReporter, NoProgress};

/// Owns the storage location and the embedder an index is built with.
pub struct IndexManager {
    storage_dir: PathBuf,
    embedder: Arc<dyn EmbeddingService>,
    options: BuildOptions,
    progress: Box<dyn BuildProgressReporter>,
}

impl IndexManager {
    pub fn new(storage_dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            embedder,
            options: BuildOptions::default(),
            progress: Box::new(NoProgress),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self::new(config.storage.dir.clone(), embedder)
            .with_options(BuildOptions::from(&config.embedding))
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn BuildProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingService> {
        Arc::clone(&self.embedder)
    }

    /// Load the persisted index, or build one from `chunks` and persist it.
    ///
    /// # Errors
    ///
    /// - [`QaError::Config`] if nothing usable is stored and `chunks` is
    ///   `None` or empty.
    /// - Any error from building or persisting.
    pub async fn create_or_load(&self, chunks: Option<Vec<Chunk>>) -> Result<VectorIndex> {
        self.create_or_load_with(|| Ok(chunks.unwrap_or_default()))
            .await
    }

    /// Like [`create_or_load`](Self::create_or_load), but chunks are only
    /// produced when no stored index can be used.
    pub async fn create_or_load_with<F>(&self, chunks: F) -> Result<VectorIndex>
    where
        F: FnOnce() -> Result<Vec<Chunk>>,
    {
        match VectorIndex::load_compatible(
            &self.storage_dir,
            self.embedder.model_name(),
            self.embedder.dims(),
        ) {
            Ok(index) => {
                info!(
                    path = %self.storage_dir.display(),
                    chunks = index.len(),
                    "loaded persisted index"
                );
                return Ok(index);
            }
            Err(LoadError::NotFound(_)) => {
                info!(path = %self.storage_dir.display(), "no persisted index, building");
            }
            Err(e @ LoadError::Corrupt { .. }) => {
                warn!(error = %e, "persisted index unusable, rebuilding");
            }
        }

        let chunks = chunks()?;
        if chunks.is_empty() {
            return Err(QaError::config("no existing index and no chunks supplied"));
        }

        let index = VectorIndex::build(
            chunks,
            Arc::clone(&self.embedder),
            self.options,
            self.progress.as_ref(),
        )
        .await?;
        index.persist(&self.storage_dir)?;
        self.progress.report(BuildProgressEvent::Persisted {
            chunks: index.len() as u64,
        });
        info!(
            path = %self.storage_dir.display(),
            chunks = index.len(),
            "persisted new index"
        );
        Ok(index)
    }

    /// Delete persisted storage without building a replacement.
    ///
    /// Returns whether anything was deleted.
    pub fn clear_index(&self) -> Result<bool> {
        clear_storage(&self.storage_dir)
    }
}

/// Delete the index stored at `dir`, if any. Needs no embedder, so
/// `docqa rebuild` works without provider credentials.
pub fn clear_storage(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)?;
    info!(path = %dir.display(), "cleared persisted index");
    Ok(true)
}
