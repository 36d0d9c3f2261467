//! docq: question answering over a local PDF collection.
//!
//! Documents are read page by page, split by a configurable chunking
//! strategy, embedded, and stored in an exact nearest-neighbor vector
//! index persisted on disk. Queries are embedded, matched against the
//! index, reranked by a cross-encoder, and answered by a generation
//! service; an optional self-reflective loop judges each answer and
//! refines the query until it is sufficient or an iteration cap is hit.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML configuration and validation |
//! | [`models`] | Pages, chunks, scored results, responses |
//! | [`reader`] | PDF text extraction |
//! | [`chunker`] | Chunking strategies |
//! | [`embedding`] | Embedding service client |
//! | [`index`] | Vector index and persistence |
//! | [`index_manager`] | Index identity, staleness, pruning |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`prompt`] | Prompt templates and verdict parsing |
//! | [`generate`] | Answer generation client |
//! | [`selfrag`] | Self-reflective retrieval loop |
//! | [`engine`] | Pipeline orchestration |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod generate;
pub mod index;
pub mod index_manager;
pub mod models;
pub mod prompt;
pub mod reader;
pub mod rerank;
pub mod selfrag;
