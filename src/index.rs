//! In-memory vector index with on-disk persistence.
//!
//! A [`VectorIndex`] holds every chunk together with exactly one embedding
//! vector of the index's dimension. Search is exact: the query is scored
//! against every entry by cosine similarity and the best `k` are returned.
//! Entries with equal scores keep their insertion order.
//!
//! # Storage layout
//!
//! ```text
//! <storage.dir>/
//!   chunks.json     chunk records in insertion order
//!   vectors.bin     count × dims little-endian f32
//!   manifest.json   version, model, dims, count, payload checksums
//! ```
//!
//! [`VectorIndex::persist`] writes all three files into a temporary sibling
//! directory (manifest last) and renames it into place, so a crash never
//! leaves a directory that [`VectorIndex::load`] would accept. `load`
//! distinguishes an absent directory ([`LoadError::NotFound`]) from one that
//! fails validation ([`LoadError::Corrupt`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::embedding::{blob_to_vec, vec_to_blob, EmbeddingService};
use crate::error::{LoadError, QaError, Result};
use crate::models::{Chunk, ScoredChunk};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};

const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Batching and parallelism for [`VectorIndex::build`].
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    /// Maximum embedding batches in flight.
    pub concurrency: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 4,
        }
    }
}

impl From<&EmbeddingConfig> for BuildOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    model: String,
    dims: usize,
    count: usize,
    chunks_sha256: String,
    vectors_sha256: String,
    created_at: DateTime<Utc>,
}

/// Chunks and their embedding vectors, ready for querying.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Embed every chunk and assemble an index.
    ///
    /// Chunks are embedded in batches of `options.batch_size` with at most
    /// `options.concurrency` batches in flight. The first failing batch
    /// aborts the build; no partial index is returned.
    ///
    /// # Errors
    ///
    /// - [`QaError::Config`] if `chunks` is empty.
    /// - [`QaError::ExternalService`] if any embedding call fails or returns
    ///   a vector of the wrong dimension.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingService>,
        options: BuildOptions,
        progress: &dyn BuildProgressReporter,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(QaError::config("cannot build an index from zero chunks"));
        }

        let dims = embedder.dims();
        let total = chunks.len();
        let batch_size = options.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedder = Arc::clone(&embedder);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| QaError::external("embedding", "build cancelled"))?;
                let vectors = embedder.embed_batch(&texts).await?;
                Ok::<_, QaError>((batch_idx, texts.len(), vectors))
            });
        }

        let mut batches: Vec<Option<Vec<Vec<f32>>>> = vec![None; total.div_ceil(batch_size)];
        let mut embedded = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let (batch_idx, expected, vectors) = joined
                .map_err(|e| QaError::external("embedding", format!("worker failed: {}", e)))??;

            if vectors.len() != expected {
                return Err(QaError::external(
                    "embedding",
                    format!("expected {} vectors, got {}", expected, vectors.len()),
                ));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(QaError::external(
                    "embedding",
                    format!("expected {} dimensions, got {}", dims, bad.len()),
                ));
            }
            if vectors.iter().flatten().any(|x| !x.is_finite()) {
                return Err(QaError::external(
                    "embedding",
                    "provider returned a non-finite vector component",
                ));
            }

            embedded += vectors.len();
            batches[batch_idx] = Some(vectors);
            progress.report(BuildProgressEvent::Embedding {
                n: embedded as u64,
                total: total as u64,
            });
        }

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().flatten().collect();
        if vectors.len() != total {
            return Err(QaError::external(
                "embedding",
                format!("embedded {} of {} chunks", vectors.len(), total),
            ));
        }

        info!(chunks = total, dims, model = embedder.model_name(), "built index");
        Ok(Self::from_parts(
            embedder.model_name().to_string(),
            dims,
            chunks,
            vectors,
        ))
    }

    fn from_parts(model: String, dims: usize, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Self {
        let norms = vectors.iter().map(|v| l2_norm(v)).collect();
        Self {
            model,
            dims,
            chunks,
            vectors,
            norms,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Name of the embedding model the vectors came from.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return the `min(k, len)` entries most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// [`QaError::Config`] if `k == 0`; [`QaError::ExternalService`] if the
    /// query vector's dimension differs from the index's or it holds a
    /// non-finite component.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(QaError::config("top_k must be >= 1"));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(QaError::external(
                "embedding",
                "query vector has a non-finite component",
            ));
        }
        if query.len() != self.dims {
            return Err(QaError::external(
                "embedding",
                format!(
                    "query vector has {} dimensions, index has {}",
                    query.len(),
                    self.dims
                ),
            ));
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (v, norm))| {
                let denom = query_norm * norm;
                let score = if denom < f32::EPSILON {
                    0.0
                } else {
                    dot(query, v) / denom
                };
                (i, score)
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Write the index to `dir`, replacing whatever was there.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "storage".to_string());
        let tmp = parent.join(format!(".{}.tmp-{}", dir_name, uuid::Uuid::new_v4()));

        let written = self.write_files(&tmp).and_then(|_| {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::rename(&tmp, dir)?;
            Ok(())
        });
        if written.is_err() {
            let _ = std::fs::remove_dir_all(&tmp);
        }
        written?;

        debug!(path = %dir.display(), chunks = self.len(), "persisted index");
        Ok(())
    }

    fn write_files(&self, tmp: &Path) -> Result<()> {
        std::fs::create_dir_all(tmp)?;

        let chunks_bytes = serde_json::to_vec(&self.chunks)?;
        let mut vectors_bytes = Vec::with_capacity(self.len() * self.dims * 4);
        for v in &self.vectors {
            vectors_bytes.extend_from_slice(&vec_to_blob(v));
        }

        std::fs::write(tmp.join(CHUNKS_FILE), &chunks_bytes)?;
        std::fs::write(tmp.join(VECTORS_FILE), &vectors_bytes)?;

        let manifest = Manifest {
            version: FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            count: self.len(),
            chunks_sha256: sha256_hex(&chunks_bytes),
            vectors_sha256: sha256_hex(&vectors_bytes),
            created_at: Utc::now(),
        };
        std::fs::write(
            tmp.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        Ok(())
    }

    /// Read a previously persisted index from `dir`.
    pub fn load(dir: &Path) -> std::result::Result<Self, LoadError> {
        if !dir.exists() {
            return Err(LoadError::NotFound(dir.to_path_buf()));
        }
        let corrupt = |reason: String| LoadError::Corrupt {
            path: dir.to_path_buf(),
            reason,
        };

        let manifest_bytes = std::fs::read(dir.join(MANIFEST_FILE))
            .map_err(|e| corrupt(format!("cannot read {}: {}", MANIFEST_FILE, e)))?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt(format!("invalid {}: {}", MANIFEST_FILE, e)))?;
        if manifest.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                manifest.version
            )));
        }

        let chunks_bytes = std::fs::read(dir.join(CHUNKS_FILE))
            .map_err(|e| corrupt(format!("cannot read {}: {}", CHUNKS_FILE, e)))?;
        let vectors_bytes = std::fs::read(dir.join(VECTORS_FILE))
            .map_err(|e| corrupt(format!("cannot read {}: {}", VECTORS_FILE, e)))?;

        if sha256_hex(&chunks_bytes) != manifest.chunks_sha256 {
            return Err(corrupt(format!("{} checksum mismatch", CHUNKS_FILE)));
        }
        if sha256_hex(&vectors_bytes) != manifest.vectors_sha256 {
            return Err(corrupt(format!("{} checksum mismatch", VECTORS_FILE)));
        }

        let chunks: Vec<Chunk> = serde_json::from_slice(&chunks_bytes)
            .map_err(|e| corrupt(format!("invalid {}: {}", CHUNKS_FILE, e)))?;
        if chunks.len() != manifest.count {
            return Err(corrupt(format!(
                "manifest lists {} chunks, found {}",
                manifest.count,
                chunks.len()
            )));
        }
        if manifest.dims == 0 {
            return Err(corrupt("manifest lists 0 dimensions".to_string()));
        }
        let expected_bytes = manifest
            .count
            .checked_mul(manifest.dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                corrupt(format!(
                    "manifest size {} x {} dims overflows",
                    manifest.count, manifest.dims
                ))
            })?;
        if vectors_bytes.len() != expected_bytes {
            return Err(corrupt(format!(
                "{} has {} bytes, expected {}",
                VECTORS_FILE,
                vectors_bytes.len(),
                expected_bytes
            )));
        }

        let vectors: Vec<Vec<f32>> = vectors_bytes
            .chunks_exact(manifest.dims * 4)
            .map(blob_to_vec)
            .collect();

        debug!(path = %dir.display(), chunks = chunks.len(), "loaded index");
        Ok(Self::from_parts(manifest.model, manifest.dims, chunks, vectors))
    }

    /// [`load`](Self::load) with the failure as a [`QaError`]:
    /// [`QaError::NotFound`] or [`QaError::CorruptIndex`].
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self::load(dir)?)
    }

    /// [`load`](Self::load), then reject an index built by a different
    /// embedding model or dimension.
    pub fn load_compatible(
        dir: &Path,
        model: &str,
        dims: usize,
    ) -> std::result::Result<Self, LoadError> {
        let index = Self::load(dir)?;
        if index.model != model || index.dims != dims {
            return Err(LoadError::Corrupt {
                path: dir.to_path_buf(),
                reason: format!(
                    "incompatible: built with {} ({} dims), configured {} ({} dims)",
                    index.model, index.dims, model, dims
                ),
            });
        }
        Ok(index)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
