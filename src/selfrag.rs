//! Self-reflective retrieval loop ("Self-RAG").
//!
//! After the initial retrieve/rerank/generate pass, the loop asks a judge
//! (the same generation service, different prompt) whether the answer
//! fully addresses the query. An insufficient answer triggers a query
//! reformulation and a fresh retrieval pass, up to `max_iterations`.
//!
//! Known limitation: when the refine step fails or returns nothing, the
//! previous query is reused unchanged. The next pass then re-runs an
//! identical retrieval and will likely reach the same verdict, so the
//! iteration cap is the only guarantee of termination — query change is
//! not.

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, SelfRagConfig};
use crate::embedding::{embed_query, Embedder};
use crate::generate::{generate_answer, Generator};
use crate::index::VectorIndex;
use crate::models::{IterationRecord, ScoredChunk, SelfRagReport};
use crate::prompt;
use crate::rerank::{rerank, CrossEncoder};

/// Output budget for judge and refine calls; verdicts and rewritten
/// queries are short.
const JUDGE_MAX_TOKENS: u32 = 120;

/// How many reranked chunks feed each in-loop generation pass.
const LOOP_TOP_K: usize = 5;

/// Generation confidence constants for the uncertainty heuristic.
const CONFIDENCE_LOW: f32 = 0.3;
const CONFIDENCE_HIGH: f32 = 0.9;

/// Phrases that mark an uncertain answer (case-insensitive substring
/// match, English and Turkish).
const UNCERTAINTY_MARKERS: &[&str] = &[
    "i don't know",
    "i do not know",
    "not sure",
    "cannot find",
    "can't find",
    "no information",
    "no answer generated",
    "bilmiyorum",
    "emin değilim",
    "bulunamadı",
    "bilgi yok",
];

/// Components the loop drives. All service boundaries are trait objects
/// so the loop can be exercised with in-test doubles.
pub struct SelfRagLoop<'a> {
    pub embedder: &'a dyn Embedder,
    pub index: &'a VectorIndex,
    pub encoder: &'a dyn CrossEncoder,
    pub generator: &'a dyn Generator,
    pub generation: &'a GenerationConfig,
    pub config: &'a SelfRagConfig,
}

/// Outcome of a loop run: the answer to return to the caller plus the
/// full diagnostic report.
pub struct SelfRagOutcome {
    pub answer: String,
    pub report: SelfRagReport,
}

impl<'a> SelfRagLoop<'a> {
    /// Run the evaluate/refine cycle starting from the initial draft.
    ///
    /// `initial_similarities` are the raw index scores of the *original*
    /// query's first retrieval; they feed the retrieval-confidence
    /// heuristic and are not recomputed as the query is refined.
    pub async fn run(
        &self,
        original_query: &str,
        initial_answer: String,
        initial_similarities: &[f32],
    ) -> Result<SelfRagOutcome> {
        let mut query = original_query.to_string();
        let mut answer = initial_answer;
        let mut iterations: Vec<IterationRecord> = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let (sufficient, explanation) = self.evaluate(&query, &answer).await;
            debug!(iteration, sufficient, "self-rag evaluation");

            iterations.push(IterationRecord {
                query: query.clone(),
                answer: answer.clone(),
                sufficient,
                explanation,
            });

            if sufficient || iteration + 1 == self.config.max_iterations {
                break;
            }

            query = self.refine(&query, &answer).await;
            answer = self.redraft(&query).await?;
        }

        let retrieval_confidence = retrieval_confidence(initial_similarities);
        let generation_confidence = generation_confidence(&answer);

        Ok(SelfRagOutcome {
            report: SelfRagReport {
                iterations,
                final_query: query,
                retrieval_confidence,
                generation_confidence,
                final_score: (retrieval_confidence + generation_confidence) / 2.0,
            },
            answer,
        })
    }

    /// Ask the judge whether the answer fully addresses the query. A
    /// failed or empty judge response defaults to insufficient.
    async fn evaluate(&self, query: &str, answer: &str) -> (bool, String) {
        let prompt = prompt::sufficiency_prompt(query, answer);
        match self
            .generator
            .generate(&prompt, JUDGE_MAX_TOKENS, 0.0)
            .await
        {
            Ok(response) if !response.trim().is_empty() => prompt::parse_verdict(&response),
            Ok(_) => (
                false,
                "Judge returned an empty response; treating answer as insufficient.".to_string(),
            ),
            Err(e) => {
                warn!(error = %e, "sufficiency judge failed");
                (
                    false,
                    format!("Judge unavailable ({e}); treating answer as insufficient."),
                )
            }
        }
    }

    /// Ask the judge for an improved query. A failed or empty response
    /// reuses the previous query unchanged; the loop still advances and
    /// is bounded only by the iteration cap.
    async fn refine(&self, query: &str, answer: &str) -> String {
        let prompt = prompt::refine_prompt(query, answer);
        match self
            .generator
            .generate(&prompt, JUDGE_MAX_TOKENS, 0.0)
            .await
        {
            Ok(response) => {
                let refined = response.trim();
                if refined.is_empty() {
                    debug!("refine returned empty; reusing previous query");
                    query.to_string()
                } else {
                    refined.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "query refinement failed; reusing previous query");
                query.to_string()
            }
        }
    }

    /// Retrieve, rerank, and generate a fresh draft for the (possibly
    /// refined) query. The retrieval width is the loop's own, independent
    /// of whatever the caller asked for.
    async fn redraft(&self, query: &str) -> Result<String> {
        let query_vector = embed_query(self.embedder, query).await?;
        let candidates = self.index.search(&query_vector, self.config.retrieval_k);
        let reranked = rerank(self.encoder, query, candidates, LOOP_TOP_K).await?;
        let chunks: Vec<_> = reranked.into_iter().map(|sc: ScoredChunk| sc.chunk).collect();
        generate_answer(self.generator, self.generation, query, &chunks).await
    }
}

/// Mean of the initial similarities mapped from `[-1, 1]` to `[0, 1]`.
/// An empty retrieval scores zero.
pub fn retrieval_confidence(similarities: &[f32]) -> f32 {
    if similarities.is_empty() {
        return 0.0;
    }
    similarities.iter().map(|s| (s + 1.0) / 2.0).sum::<f32>() / similarities.len() as f32
}

/// Fixed-constant heuristic: low when the answer contains an uncertainty
/// marker, high otherwise. Not a calibrated probability.
pub fn generation_confidence(answer: &str) -> f32 {
    let lower = answer.to_lowercase();
    if UNCERTAINTY_MARKERS.iter().any(|m| lower.contains(m)) {
        CONFIDENCE_LOW
    } else {
        CONFIDENCE_HIGH
    }
}
