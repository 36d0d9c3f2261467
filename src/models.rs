//! Core data models used throughout docq.
//!
//! These types represent the pages, chunks, and scored results that flow
//! through the indexing and question-answering pipeline.

use serde::{Deserialize, Serialize};

/// One physical page of a source document, 1-indexed.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// A retrievable unit of text with page and source provenance.
///
/// `chunk_id` is unique and strictly increasing within a single chunking
/// pass over one source document; it carries no meaning across rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    pub chunk_id: u64,
    pub source_file: String,
}

/// A chunk paired with a relevance score.
///
/// The score's meaning depends on the stage that produced it: the vector
/// index yields a normalized inner-product similarity in `[-1, 1]`, while
/// the reranker yields a cross-encoder score on its own scale. The two are
/// not comparable.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Chunk payload as returned to callers of
/// [`RagEngine::process_query`](crate::engine::RagEngine::process_query).
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub text: String,
    pub source_file: String,
    pub page: u32,
    pub chunk_id: u64,
    pub score: f32,
}

impl From<ScoredChunk> for ChunkHit {
    fn from(sc: ScoredChunk) -> Self {
        Self {
            text: sc.chunk.text,
            source_file: sc.chunk.source_file,
            page: sc.chunk.page,
            chunk_id: sc.chunk.chunk_id,
            score: sc.score,
        }
    }
}

/// One iteration of the self-reflective retrieval loop.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub query: String,
    pub answer: String,
    pub sufficient: bool,
    pub explanation: String,
}

/// Diagnostic block produced by the self-reflective loop.
///
/// The confidence values are heuristics, not calibrated probabilities:
/// retrieval confidence maps the original query's raw similarities from
/// `[-1, 1]` to `[0, 1]`, and generation confidence is a fixed constant
/// chosen by scanning the final answer for uncertainty markers.
#[derive(Debug, Clone, Serialize)]
pub struct SelfRagReport {
    pub iterations: Vec<IterationRecord>,
    pub final_query: String,
    pub retrieval_confidence: f32,
    pub generation_confidence: f32,
    pub final_score: f32,
}

/// Full response for one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub chunks: Vec<ChunkHit>,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_rag: Option<SelfRagReport>,
}
