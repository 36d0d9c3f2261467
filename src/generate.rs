//! Answer generation via an external text-generation service.
//!
//! [`Generator`] is the boundary trait; [`CohereGenerator`] calls the
//! Cohere chat API. [`generate_answer`] builds the answer prompt from the
//! supporting chunks and maps an empty-but-successful response to the
//! fallback literal rather than an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::Chunk;
use crate::prompt;

/// Text generation boundary. An `Ok` result may be empty; callers decide
/// what an empty completion means.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

/// Generate a grounded answer from the question and its supporting chunks.
///
/// Returns the fallback literal when the service produces no text; service
/// call failures still propagate as errors.
pub async fn generate_answer(
    generator: &dyn Generator,
    config: &GenerationConfig,
    question: &str,
    context_chunks: &[Chunk],
) -> Result<String> {
    let prompt = prompt::answer_prompt(question, context_chunks);
    let answer = generator
        .generate(&prompt, config.max_tokens, config.temperature)
        .await?;

    let answer = answer.trim();
    if answer.is_empty() {
        Ok(prompt::NO_ANSWER.to_string())
    } else {
        Ok(answer.to_string())
    }
}

/// Generator backed by the Cohere chat API.
///
/// Requires the `COHERE_API_KEY` environment variable. Retry policy
/// matches the other HTTP clients in this crate.
pub struct CohereGenerator {
    model: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl CohereGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
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
impl Generator for CohereGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let api_key = std::env::var("COHERE_API_KEY")
            .map_err(|_| anyhow::anyhow!("COHERE_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.cohere.com/v2/chat")
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
                        return Ok(parse_chat_response(&json));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Generation API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Generation API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Extract the concatenated text content from a chat response. A response
/// without text content yields an empty string, not an error.
fn parse_chat_response(json: &serde_json::Value) -> String {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "cohere" => Ok(Box::new(CohereGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoGenerator(String);

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, _p: &str, _m: u32, _t: f32) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            page: 1,
            chunk_id: 0,
            source_file: "t.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_completion_becomes_fallback() {
        let gen = EchoGenerator("   ".to_string());
        let answer = generate_answer(&gen, &GenerationConfig::default(), "q", &[chunk("ctx")])
            .await
            .unwrap();
        assert_eq!(answer, prompt::NO_ANSWER);
    }

    #[tokio::test]
    async fn completion_is_trimmed() {
        let gen = EchoGenerator("\n The answer. \n".to_string());
        let answer = generate_answer(&gen, &GenerationConfig::default(), "q", &[chunk("ctx")])
            .await
            .unwrap();
        assert_eq!(answer, "The answer.");
    }

    #[test]
    fn parse_chat_response_joins_text_parts() {
        let json = serde_json::json!({
            "message": { "content": [
                { "type": "text", "text": "Hello " },
                { "type": "text", "text": "world" },
            ]}
        });
        assert_eq!(parse_chat_response(&json), "Hello world");
    }

    #[test]
    fn parse_chat_response_tolerates_missing_content() {
        assert_eq!(parse_chat_response(&serde_json::json!({})), "");
    }
}
