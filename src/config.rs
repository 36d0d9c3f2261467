use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub self_rag: SelfRagConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory scanned for `*.pdf` source documents.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Base directory holding one `index_<hash>` directory per file-set identity.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// How many index directories `indices prune` retains.
    #[serde(default = "default_keep_latest")]
    pub keep_latest: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            keep_latest: default_keep_latest(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./indices")
}
fn default_keep_latest() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Chunking strategy: token_window, recursive, semantic, or structure_aware.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_strategy() -> String {
    "structure_aware".to_string()
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates pulled from the vector index before reranking.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Final results returned after reranking.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_candidate_k() -> usize {
    10
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: default_rerank_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_provider() -> String {
    "cohere".to_string()
}
fn default_rerank_model() -> String {
    "rerank-v3.5".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            max_tokens: default_gen_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "cohere".to_string()
}
fn default_generation_model() -> String {
    "command-r-plus".to_string()
}
fn default_gen_max_tokens() -> u32 {
    200
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelfRagConfig {
    #[serde(default = "default_self_rag_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Retrieval width used inside the loop, independent of the caller's top_k.
    #[serde(default = "default_loop_k")]
    pub retrieval_k: usize,
}

impl Default for SelfRagConfig {
    fn default() -> Self {
        Self {
            enabled: default_self_rag_enabled(),
            max_iterations: default_max_iterations(),
            retrieval_k: default_loop_k(),
        }
    }
}

fn default_self_rag_enabled() -> bool {
    true
}
fn default_max_iterations() -> usize {
    3
}
fn default_loop_k() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    match config.chunking.strategy.as_str() {
        "token_window" | "recursive" | "semantic" | "structure_aware" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be token_window, recursive, semantic, or structure_aware.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.candidate_k == 0 || config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.candidate_k and retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified for provider 'openai'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 for provider 'openai'");
            }
        }
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be openai.", other),
    }

    match config.rerank.provider.as_str() {
        "cohere" => {}
        other => anyhow::bail!("Unknown rerank provider: '{}'. Must be cohere.", other),
    }

    match config.generation.provider.as_str() {
        "cohere" => {}
        other => anyhow::bail!("Unknown generation provider: '{}'. Must be cohere.", other),
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    if config.self_rag.max_iterations == 0 {
        anyhow::bail!("self_rag.max_iterations must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const VALID: &str = r#"
[data]
dir = "./data"

[chunking]
max_tokens = 480
overlap_tokens = 50

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#;

    #[test]
    fn valid_config_parses() {
        let f = write_config(VALID);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_tokens, 480);
        assert_eq!(cfg.chunking.strategy, "structure_aware");
        assert_eq!(cfg.retrieval.candidate_k, 10);
        assert_eq!(cfg.self_rag.max_iterations, 3);
    }

    #[test]
    fn overlap_must_be_below_max_tokens() {
        let f = write_config(
            r#"
[data]
dir = "./data"

[chunking]
max_tokens = 50
overlap_tokens = 50

[embedding]
model = "text-embedding-3-small"
dims = 1536
"#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn unknown_strategy_rejected() {
        let f = write_config(
            r#"
[data]
dir = "./data"

[chunking]
strategy = "telepathic"
max_tokens = 480

[embedding]
model = "text-embedding-3-small"
dims = 1536
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn embedding_dims_required() {
        let f = write_config(
            r#"
[data]
dir = "./data"

[chunking]
max_tokens = 480

[embedding]
model = "text-embedding-3-small"
"#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("dims"));
    }
}
