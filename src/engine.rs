//! Pipeline orchestration: document ingestion, index lifecycle, and the
//! query path.
//!
//! [`RagEngine`] owns every stage behind its boundary trait, so the whole
//! pipeline can run against in-process doubles. The active [`VectorIndex`]
//! sits behind an `RwLock<Arc<..>>`: queries clone the `Arc` under the read
//! lock and work on that snapshot, while a rebuild swaps in a fresh index
//! under the write lock without blocking in-flight searches.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunker::{create_chunker, Chunker};
use crate::config::Config;
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::generate::{create_generator, generate_answer, Generator};
use crate::index::VectorIndex;
use crate::index_manager::IndexManager;
use crate::models::{Chunk, ChunkHit, QueryResponse};
use crate::prompt;
use crate::reader::{DocumentReader, PdfReader};
use crate::rerank::{create_reranker, rerank, CrossEncoder};
use crate::selfrag::SelfRagLoop;

/// How many chunk texts go to the embedding service per request.
const EMBED_BATCH: usize = 64;

pub struct RagEngine {
    config: Config,
    reader: Box<dyn DocumentReader>,
    chunker: Box<dyn Chunker>,
    embedder: Box<dyn Embedder>,
    encoder: Box<dyn CrossEncoder>,
    generator: Box<dyn Generator>,
    manager: IndexManager,
    index: RwLock<Arc<VectorIndex>>,
}

impl RagEngine {
    /// Build the engine from configuration. The index starts empty: callers
    /// that want the persisted index call [`initialize`](Self::initialize);
    /// a full rebuild goes straight to [`rebuild_index`](Self::rebuild_index)
    /// so the corpus is embedded exactly once.
    pub fn new(config: Config) -> Result<Self> {
        let reader = Box::new(PdfReader);
        let chunker = create_chunker(&config.chunking)?;
        let embedder = create_embedder(&config.embedding)?;
        let encoder = create_reranker(&config.rerank)?;
        let generator = create_generator(&config.generation)?;

        Ok(Self::with_components(
            config, reader, chunker, embedder, encoder, generator,
        ))
    }

    /// Assemble an engine from explicit components. The index starts empty;
    /// call [`initialize`](Self::initialize) to load or build it.
    pub fn with_components(
        config: Config,
        reader: Box<dyn DocumentReader>,
        chunker: Box<dyn Chunker>,
        embedder: Box<dyn Embedder>,
        encoder: Box<dyn CrossEncoder>,
        generator: Box<dyn Generator>,
    ) -> Self {
        let manager = IndexManager::new(config.index.dir.clone());
        let dims = embedder.dims();
        Self {
            config,
            reader,
            chunker,
            embedder,
            encoder,
            generator,
            manager,
            index: RwLock::new(Arc::new(VectorIndex::new(dims))),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    /// Number of chunks in the active index.
    pub fn document_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<VectorIndex> {
        match self.index.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, index: VectorIndex) {
        let index = Arc::new(index);
        match self.index.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
    }

    /// All PDF files under the data directory, sorted for a stable
    /// index identity. A missing directory is created and scanned as an
    /// empty corpus.
    pub fn scan_documents(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.data.dir;
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Load the persisted index for the current document set, or build and
    /// persist a fresh one if none exists or the load fails.
    pub async fn initialize(&self) -> Result<()> {
        let files = self.scan_documents()?;
        let index_path = self.manager.index_path(&files);

        if VectorIndex::exists(&index_path) {
            match VectorIndex::load(&index_path, self.embedder.dims()) {
                Ok(index) => {
                    info!(
                        index = %index_path.display(),
                        chunks = index.len(),
                        "loaded persisted index"
                    );
                    self.install(index);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        index = %index_path.display(),
                        error = %e,
                        "persisted index unusable, rebuilding"
                    );
                }
            }
        }

        let index = self.build_index(&files).await?;
        index
            .save(&index_path)
            .with_context(|| format!("Failed to persist index to {}", index_path.display()))?;
        info!(index = %index_path.display(), chunks = index.len(), "built index");
        self.install(index);
        Ok(())
    }

    /// Discard every persisted index and rebuild from the current document
    /// set. Safe to run repeatedly; an empty data directory yields an empty
    /// index.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let files = self.scan_documents()?;
        self.manager.clear_all()?;

        let index = self.build_index(&files).await?;
        let index_path = self.manager.index_path(&files);
        index
            .save(&index_path)
            .with_context(|| format!("Failed to persist index to {}", index_path.display()))?;

        let count = index.len();
        info!(index = %index_path.display(), chunks = count, "rebuilt index");
        self.install(index);
        Ok(count)
    }

    /// Read, chunk, and embed every document into a new index.
    async fn build_index(&self, files: &[PathBuf]) -> Result<VectorIndex> {
        let mut index = VectorIndex::new(self.embedder.dims());
        let mut chunks: Vec<Chunk> = Vec::new();

        for path in files {
            let source = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());
            let pages = self
                .reader
                .read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut doc_chunks = self.chunker.chunk(&pages, &source);
            info!(file = %source, pages = pages.len(), chunks = doc_chunks.len(), "chunked document");
            chunks.append(&mut doc_chunks);
        }

        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            index.add(vectors, batch.to_vec())?;
        }

        Ok(index)
    }

    /// Answer a query: embed, retrieve candidates, rerank, generate, and
    /// optionally run the self-reflective loop.
    ///
    /// `top_k` overrides the configured result count; `use_self_rag` gates
    /// the loop in addition to the configuration switch.
    pub async fn process_query(
        &self,
        query: &str,
        top_k: Option<usize>,
        use_self_rag: bool,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let index = self.snapshot();

        let query_vector = embed_query(self.embedder.as_ref(), query).await?;
        let candidates = index.search(&query_vector, self.config.retrieval.candidate_k);
        let initial_similarities: Vec<f32> = candidates.iter().map(|c| c.score).collect();

        let reranked = rerank(self.encoder.as_ref(), query, candidates, top_k).await?;

        // Nothing retrieved means nothing to ground an answer in; skip the
        // generation and reflection services entirely.
        if reranked.is_empty() {
            return Ok(QueryResponse {
                answer: prompt::NO_ANSWER.to_string(),
                chunks: Vec::new(),
                processing_time: started.elapsed().as_secs_f64(),
                self_rag: None,
            });
        }

        let context: Vec<Chunk> = reranked.iter().map(|sc| sc.chunk.clone()).collect();
        let mut answer =
            generate_answer(self.generator.as_ref(), &self.config.generation, query, &context)
                .await?;

        let mut report = None;
        if use_self_rag && self.config.self_rag.enabled {
            let looper = SelfRagLoop {
                embedder: self.embedder.as_ref(),
                index: &index,
                encoder: self.encoder.as_ref(),
                generator: self.generator.as_ref(),
                generation: &self.config.generation,
                config: &self.config.self_rag,
            };
            let outcome = looper.run(query, answer, &initial_similarities).await?;
            answer = outcome.answer;
            report = Some(outcome.report);
        }

        Ok(QueryResponse {
            answer,
            chunks: reranked.into_iter().map(ChunkHit::from).collect(),
            processing_time: started.elapsed().as_secs_f64(),
            self_rag: report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::TokenWindowChunker;
    use crate::config::{ChunkingConfig, DataConfig};
    use async_trait::async_trait;
    use std::fs;

    struct NullReader;

    impl DocumentReader for NullReader {
        fn read(&self, _file_path: &std::path::Path) -> Result<Vec<crate::models::Page>> {
            Ok(Vec::new())
        }
    }

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        fn model_name(&self) -> &str {
            "null"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct NullEncoder;

    #[async_trait]
    impl CrossEncoder for NullEncoder {
        async fn score(&self, _q: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.0; texts.len()])
        }
    }

    struct NullGenerator;

    #[async_trait]
    impl Generator for NullGenerator {
        async fn generate(&self, _p: &str, _m: u32, _t: f32) -> Result<String> {
            Ok(String::new())
        }
    }

    fn test_engine(data_dir: PathBuf, index_dir: PathBuf) -> RagEngine {
        let config = Config {
            data: DataConfig { dir: data_dir },
            index: crate::config::IndexConfig {
                dir: index_dir,
                keep_latest: 3,
            },
            chunking: ChunkingConfig {
                strategy: "token_window".to_string(),
                max_tokens: 100,
                overlap_tokens: 10,
            },
            retrieval: Default::default(),
            embedding: Default::default(),
            rerank: Default::default(),
            generation: Default::default(),
            self_rag: Default::default(),
        };
        RagEngine::with_components(
            config,
            Box::new(NullReader),
            Box::new(TokenWindowChunker::new(100, 10).unwrap()),
            Box::new(NullEmbedder),
            Box::new(NullEncoder),
            Box::new(NullGenerator),
        )
    }

    #[test]
    fn scan_finds_only_pdfs_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.pdf"), "x").unwrap();
        fs::write(tmp.path().join("a.PDF"), "x").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let engine = test_engine(tmp.path().to_path_buf(), tmp.path().join("indices"));
        let files = engine.scan_documents().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.PDF"));
        assert!(files[1].ends_with("b.pdf"));
    }

    #[test]
    fn scan_creates_missing_data_dir_and_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("nowhere");
        let engine = test_engine(data.clone(), tmp.path().join("indices"));
        let files = engine.scan_documents().unwrap();
        assert!(files.is_empty());
        assert!(data.is_dir());
    }

    #[tokio::test]
    async fn empty_corpus_yields_empty_index_and_fallback_answer() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        let engine = test_engine(data, tmp.path().join("indices"));

        engine.initialize().await.unwrap();
        assert_eq!(engine.document_count(), 0);

        let response = engine.process_query("anything?", None, true).await.unwrap();
        assert_eq!(response.answer, prompt::NO_ANSWER);
        assert!(response.chunks.is_empty());
        assert!(response.self_rag.is_none());
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_and_keeps_one_index_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("doc.pdf"), "stub").unwrap();
        let engine = test_engine(data, tmp.path().join("indices"));

        engine.rebuild_index().await.unwrap();
        engine.rebuild_index().await.unwrap();

        let indices = engine.manager().list_indices().unwrap();
        assert_eq!(indices.len(), 1);
    }
}
