//! # Embedding index
//!
//! Owns the chunk sequence, one embedding per chunk, and a [hora] brute-force index over
//! those embeddings. Position `i` of the vector set always belongs to chunk `i`; every
//! search result is resolved back to its chunk through that position.
//!
//! ## Cache
//! Computing embeddings is the slow part of start-up, so [`EmbeddingIndex::build`] can
//! persist them to a bincode file. The file records a blake3 digest of the embedding model
//! name and every chunk's content, plus the vector dimension. A cache whose digest or
//! dimension does not match the chunks being indexed is treated as stale and recomputed,
//! so editing the corpus never serves vectors that belong to different text.
//!
//! ## Scores
//! Distances are squared Euclidean. Each result also carries
//! `similarity_score = 1 / (1 + distance)`, which lies in `(0, 1]` and decreases as the
//! distance grows.

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::bruteforce_idx::BruteForceIndex;
use hora::index::bruteforce_params::BruteForceParams;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, sync::Arc};
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::loader::{Chunk, ChunkMetadata};

const CACHE_VERSION: u32 = 1;

/// A chunk returned by [`EmbeddingIndex::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// `1 / (1 + distance)`, higher is more relevant.
    pub similarity_score: f32,
    /// Squared Euclidean distance between the query and the chunk.
    pub distance: f32,
}

impl RetrievedDoc {
    fn new(chunk: &Chunk, distance: f32) -> Self {
        Self {
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
            similarity_score: similarity_score(distance),
            distance,
        }
    }
}

/// Map a non-negative distance into `(0, 1]`.
pub fn similarity_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Squared Euclidean distance: `Σ (a[i] - b[i])²`.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// On-disk layout of the embedding cache.
#[derive(Serialize, Deserialize)]
struct EmbeddingCache {
    version: u32,
    digest: String,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// Digest identifying one chunk sequence embedded by one model.
fn chunk_digest(model_name: &str, chunks: &[Chunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_name.as_bytes());
    hasher.update(&(chunks.len() as u64).to_le_bytes());
    for chunk in chunks {
        hasher.update(&(chunk.content.len() as u64).to_le_bytes());
        hasher.update(chunk.content.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Read cached vectors if the file exists and matches `digest` and `dimension`.
fn load_cache(path: &Path, digest: &str, dimension: usize) -> Option<Vec<Vec<f32>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("No embedding cache at {}: {}", path.display(), e);
            return None;
        }
    };

    let cache: EmbeddingCache =
        match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
            Ok((cache, _)) => cache,
            Err(e) => {
                warn!("Ignoring unreadable embedding cache {}: {}", path.display(), e);
                return None;
            }
        };

    if cache.version != CACHE_VERSION || cache.digest != digest || cache.dimension != dimension {
        warn!(
            "Embedding cache {} was built from different chunks, recomputing",
            path.display()
        );
        return None;
    }

    if cache.vectors.iter().any(|v| v.len() != dimension) {
        warn!("Embedding cache {} has malformed vectors, recomputing", path.display());
        return None;
    }

    Some(cache.vectors)
}

fn save_cache(path: &Path, digest: &str, dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    let cache = EmbeddingCache {
        version: CACHE_VERSION,
        digest: digest.to_string(),
        dimension,
        vectors: vectors.to_vec(),
    };
    let bytes = bincode::serde::encode_to_vec(&cache, bincode::config::standard())
        .map_err(|e| RagError::Cache(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// The searchable state produced by a successful build.
struct BuiltIndex {
    index: BruteForceIndex<f32, usize>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

/// Nearest-neighbor index over chunk embeddings.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    built: Option<BuiltIndex>,
}

impl EmbeddingIndex {
    /// Create an unbuilt index. `batch_size` bounds how many chunks go to the embedder
    /// at once.
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            built: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Number of indexed chunks (0 before `build`).
    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.chunks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The indexed chunks, in vector order.
    pub fn chunks(&self) -> &[Chunk] {
        match &self.built {
            Some(built) => &built.chunks,
            None => &[],
        }
    }

    /// Embed (or load from `cache_path`) every chunk and index the vectors.
    ///
    /// Replaces any previously built index. A cache that cannot be read, or that belongs to
    /// a different chunk sequence, is ignored; a cache that cannot be written is reported
    /// and skipped.
    ///
    /// # Errors
    /// - Embedding failures from the model.
    /// - [`RagError::DimensionMismatch`] if the model produces vectors of the wrong width.
    /// - [`RagError::Index`] if hora rejects a vector.
    pub fn build(&mut self, chunks: Vec<Chunk>, cache_path: Option<&Path>) -> Result<()> {
        info!("Building vector index over {} chunks", chunks.len());

        let dimension = self.embedder.dimension();
        let digest = chunk_digest(self.embedder.model_name(), &chunks);

        let vectors = match cache_path.and_then(|path| load_cache(path, &digest, dimension)) {
            Some(vectors) => {
                info!("Loaded {} cached embeddings", vectors.len());
                vectors
            }
            None => {
                let vectors = self.embed_chunks(&chunks)?;
                if let Some(path) = cache_path {
                    match save_cache(path, &digest, dimension, &vectors) {
                        Ok(()) => info!("Saved embeddings to {}", path.display()),
                        Err(e) => warn!("Could not save embeddings to {}: {}", path.display(), e),
                    }
                }
                vectors
            }
        };

        if vectors.len() != chunks.len() {
            return Err(RagError::Index(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let mut index = BruteForceIndex::<f32, usize>::new(dimension, &BruteForceParams::default());
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            index
                .add(vector, position)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }
        if !vectors.is_empty() {
            index
                .build(Metric::Euclidean)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        info!("Index built with {} vectors", vectors.len());
        self.built = Some(BuiltIndex {
            index,
            chunks,
            vectors,
        });
        Ok(())
    }

    fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Generating embeddings for {} chunks with {}",
            chunks.len(),
            self.embedder.model_name()
        );
        let progress = ProgressBar::new(chunks.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} chunks")
        {
            progress.set_style(style);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embedded = self.embedder.embed_batch(&texts)?;
            if embedded.len() != texts.len() {
                return Err(RagError::Embedding(format!(
                    "model returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
            progress.inc(batch.len() as u64);
        }
        progress.finish_and_clear();

        Ok(vectors)
    }

    /// The `k` chunks nearest to `query`, nearest first.
    ///
    /// Returns every chunk when `k` exceeds the index size.
    ///
    /// # Errors
    /// - [`RagError::IndexNotBuilt`] before [`build`](Self::build).
    /// - Embedding failures for the query text.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>> {
        let built = self.built.as_ref().ok_or(RagError::IndexNotBuilt)?;

        let k = k.min(built.chunks.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        if query_vector.len() != self.embedder.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: query_vector.len(),
            });
        }

        // Rank every position so equal distances resolve by position, including at the
        // k-th place.
        let mut ranked: Vec<(f32, usize)> = built
            .index
            .search(&query_vector, built.chunks.len())
            .into_iter()
            .filter(|&position| position < built.chunks.len())
            .map(|position| {
                (
                    squared_euclidean(&query_vector, &built.vectors[position]),
                    position,
                )
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.truncate(k);

        let results: Vec<RetrievedDoc> = ranked
            .into_iter()
            .map(|(distance, position)| RetrievedDoc::new(&built.chunks[position], distance))
            .collect();

        debug!("Search for {:?} returned {} chunks", query, results.len());
        Ok(results)
    }
}
