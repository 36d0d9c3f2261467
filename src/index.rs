//! Exact nearest-neighbor vector index with on-disk persistence.
//!
//! [`VectorIndex`] stores embedding vectors and their chunks as two parallel
//! append-only sequences. Vectors are L2-normalized on insertion so that
//! inner-product search ranks by cosine similarity. Search is a linear scan;
//! the corpus is a bounded local document set, so O(n) per query is fine.
//!
//! Persistence is a directory holding three files that must be mutually
//! consistent for a load to succeed:
//!
//! | File | Contents |
//! |------|----------|
//! | `vectors.bin` | little-endian f32 blob, `count × dim` values |
//! | `chunks.json` | the chunk metadata list, in insertion order |
//! | `meta.json` | embedding dimension and document count |
//!
//! [`VectorIndex::load`] fails closed: any missing, corrupt, or mismatched
//! file yields an error and the caller's in-memory state is untouched.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{Chunk, ScoredChunk};

const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";
const META_FILE: &str = "meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    embedding_dim: usize,
    document_count: usize,
}

/// In-memory vector index over one document set.
pub struct VectorIndex {
    vectors: Vec<Vec<f32>>,
    documents: Vec<Chunk>,
    embedding_dim: usize,
}

impl VectorIndex {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            vectors: Vec::new(),
            documents: Vec::new(),
            embedding_dim,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Append vectors and their chunks. Vectors are normalized to unit L2
    /// norm before insertion; no deduplication is performed.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, documents: Vec<Chunk>) -> Result<()> {
        if vectors.len() != documents.len() {
            bail!(
                "Vector/document count mismatch: {} vectors, {} documents",
                vectors.len(),
                documents.len()
            );
        }
        for v in &vectors {
            if v.len() != self.embedding_dim {
                bail!(
                    "Vector dimension mismatch: expected {}, got {}",
                    self.embedding_dim,
                    v.len()
                );
            }
        }

        self.vectors
            .extend(vectors.into_iter().map(|v| normalize(&v)));
        self.documents.extend(documents);
        Ok(())
    }

    /// Return up to `k` chunks ordered by descending similarity to the
    /// query. Scores are inner products of normalized vectors, in `[-1, 1]`.
    /// An empty index or `k` beyond the stored count is not an error.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }

        let query = normalize(query_vector);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(&query, v)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.documents[i].clone(),
                score,
            })
            .collect()
    }

    /// True if `dir` contains a complete persisted index.
    pub fn exists(dir: &Path) -> bool {
        [VECTORS_FILE, CHUNKS_FILE, META_FILE]
            .iter()
            .all(|f| dir.join(f).is_file())
    }

    /// Persist the full index state under `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

        let mut blob = Vec::with_capacity(self.vectors.len() * self.embedding_dim * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)
            .with_context(|| "Failed to write vectors.bin")?;

        let chunks_json = serde_json::to_vec(&self.documents)?;
        std::fs::write(dir.join(CHUNKS_FILE), chunks_json)
            .with_context(|| "Failed to write chunks.json")?;

        let meta = IndexMeta {
            embedding_dim: self.embedding_dim,
            document_count: self.documents.len(),
        };
        std::fs::write(dir.join(META_FILE), serde_json::to_vec(&meta)?)
            .with_context(|| "Failed to write meta.json")?;

        Ok(())
    }

    /// Restore an index from `dir`.
    ///
    /// Fails if any file is missing or corrupt, if the persisted dimension
    /// differs from `expected_dim`, or if the three files disagree on the
    /// document count. On failure nothing is loaded; callers fall back to a
    /// rebuild.
    pub fn load(dir: &Path, expected_dim: usize) -> Result<Self> {
        let meta_bytes = std::fs::read(dir.join(META_FILE))
            .with_context(|| format!("Missing index metadata in {}", dir.display()))?;
        let meta: IndexMeta =
            serde_json::from_slice(&meta_bytes).with_context(|| "Corrupt meta.json")?;

        if meta.embedding_dim != expected_dim {
            bail!(
                "Persisted index dimension {} does not match configured dimension {}",
                meta.embedding_dim,
                expected_dim
            );
        }

        let chunks_bytes = std::fs::read(dir.join(CHUNKS_FILE))
            .with_context(|| format!("Missing chunk metadata in {}", dir.display()))?;
        let documents: Vec<Chunk> =
            serde_json::from_slice(&chunks_bytes).with_context(|| "Corrupt chunks.json")?;

        if documents.len() != meta.document_count {
            bail!(
                "Index inconsistency: meta.json says {} documents, chunks.json holds {}",
                meta.document_count,
                documents.len()
            );
        }

        let blob = std::fs::read(dir.join(VECTORS_FILE))
            .with_context(|| format!("Missing vector data in {}", dir.display()))?;
        let expected_bytes = meta.document_count * meta.embedding_dim * 4;
        if blob.len() != expected_bytes {
            bail!(
                "Index inconsistency: vectors.bin is {} bytes, expected {}",
                blob.len(),
                expected_bytes
            );
        }

        let flat = blob_to_vec(&blob);
        let vectors: Vec<Vec<f32>> = flat
            .chunks_exact(meta.embedding_dim.max(1))
            .map(|c| c.to_vec())
            .collect();

        Ok(Self {
            vectors,
            documents,
            embedding_dim: meta.embedding_dim,
        })
    }

    /// Ordered `(vector, chunk)` view, used by tests and diagnostics.
    pub fn entries(&self) -> impl Iterator<Item = (&[f32], &Chunk)> {
        self.vectors
            .iter()
            .map(|v| v.as_slice())
            .zip(self.documents.iter())
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// L2-normalize a vector. A zero vector is returned unchanged.
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
