//! Second-pass relevance scoring of retrieval candidates.
//!
//! [`CrossEncoder`] is the boundary trait for the external scoring model;
//! [`CohereReranker`] calls the Cohere rerank API. [`rerank`] discards the
//! candidates' incoming scores and re-scores purely from `(query, text)`
//! pairs, so its output scale is the cross-encoder's, not the vector
//! index's.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::RerankConfig;
use crate::models::ScoredChunk;

/// Scores query/text pairs; higher means more relevant.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score each text against the query, one score per text, in order.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// Re-score candidates with the cross-encoder, sort descending, and keep
/// the best `top_k`. An empty candidate list short-circuits without
/// invoking the scoring service.
pub async fn rerank(
    encoder: &dyn CrossEncoder,
    query: &str,
    candidates: Vec<ScoredChunk>,
    top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    let scores = encoder.score(query, &texts).await?;

    if scores.len() != texts.len() {
        bail!(
            "Rerank score count mismatch: sent {} texts, got {} scores",
            texts.len(),
            scores.len()
        );
    }

    let mut rescored: Vec<ScoredChunk> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, score)| ScoredChunk {
            chunk: c.chunk,
            score,
        })
        .collect();

    rescored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    rescored.truncate(top_k);
    Ok(rescored)
}

/// Cross-encoder backed by the Cohere rerank API.
///
/// Requires the `COHERE_API_KEY` environment variable. Retries follow the
/// same backoff policy as the embedding client: 429/5xx/network errors
/// retry, other client errors fail immediately.
pub struct CohereReranker {
    model: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl CohereReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        if std::env::var("COHERE_API_KEY").is_err() {
            bail!("COHERE_API_KEY environment variable not set");
        }
        Ok(Self {
            model: config.model.clone(),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CrossEncoder for CohereReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let api_key = std::env::var("COHERE_API_KEY")
            .map_err(|_| anyhow::anyhow!("COHERE_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.cohere.com/v2/rerank")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_rerank_response(&json, texts.len());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Rerank API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Rerank API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Rerank failed after retries")))
    }
}

/// Parse the rerank API response into per-input scores.
///
/// The API returns results sorted by relevance with an `index` pointing
/// back at the input document; this restores input order.
fn parse_rerank_response(json: &serde_json::Value, count: usize) -> Result<Vec<f32>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing results array"))?;

    let mut scores = vec![0.0f32; count];
    for item in results {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?
            as usize;
        let score = item
            .get("relevance_score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing relevance_score"))?;
        if index >= count {
            bail!("Invalid rerank response: index {} out of range", index);
        }
        scores[index] = score as f32;
    }
    Ok(scores)
}

/// Create the configured [`CrossEncoder`].
pub fn create_reranker(config: &RerankConfig) -> Result<Box<dyn CrossEncoder>> {
    match config.provider.as_str() {
        "cohere" => Ok(Box::new(CohereReranker::new(config)?)),
        other => bail!("Unknown rerank provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEncoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CrossEncoder for CountingEncoder {
        async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Longer text scores higher.
            Ok(texts.iter().map(|t| t.len() as f32).collect())
        }
    }

    fn candidate(id: u64, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                page: 1,
                chunk_id: id,
                source_file: "t.pdf".to_string(),
            },
            score,
        }
    }

    #[tokio::test]
    async fn empty_candidates_skip_the_service() {
        let enc = CountingEncoder {
            calls: AtomicUsize::new(0),
        };
        let out = rerank(&enc, "q", Vec::new(), 5).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(enc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rerank_discards_incoming_scores_and_sorts() {
        let enc = CountingEncoder {
            calls: AtomicUsize::new(0),
        };
        let candidates = vec![
            candidate(0, "short", 0.99),
            candidate(1, "a much longer candidate text", 0.01),
        ];
        let out = rerank(&enc, "q", candidates, 5).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.chunk_id, 1);
        assert!(out[0].score > out[1].score);
    }

    #[tokio::test]
    async fn rerank_truncates_to_top_k() {
        let enc = CountingEncoder {
            calls: AtomicUsize::new(0),
        };
        let candidates = vec![
            candidate(0, "aa", 0.0),
            candidate(1, "aaaa", 0.0),
            candidate(2, "a", 0.0),
        ];
        let out = rerank(&enc, "q", candidates, 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.chunk_id, 1);
        assert_eq!(out[1].chunk.chunk_id, 0);
    }

    #[test]
    fn parse_restores_input_order() {
        let json = serde_json::json!({
            "results": [
                { "index": 1, "relevance_score": 0.9 },
                { "index": 0, "relevance_score": 0.2 },
            ]
        });
        let scores = parse_rerank_response(&json, 2).unwrap();
        assert_eq!(scores, vec![0.2, 0.9]);
    }

    #[test]
    fn parse_rejects_out_of_range_index() {
        let json = serde_json::json!({
            "results": [{ "index": 5, "relevance_score": 0.9 }]
        });
        assert!(parse_rerank_response(&json, 2).is_err());
    }
}
