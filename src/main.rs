//! # docq CLI
//!
//! Command-line interface for question answering over a local PDF
//! collection.
//!
//! ## Usage
//!
//! ```bash
//! docq --config ./docq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docq index` | Rebuild the vector index from the data directory |
//! | `docq ask "<question>"` | Answer a question from the indexed documents |
//! | `docq indices list` | List persisted index directories |
//! | `docq indices prune` | Remove old index directories |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docq::config;
use docq::engine::RagEngine;

/// docq — question answering over a local PDF collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `docq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docq",
    about = "Question answering over a local PDF collection",
    version,
    long_about = "docq reads PDF documents, splits them into chunks, embeds the chunks into \
    a persisted vector index, and answers questions by retrieving, reranking, and generating \
    over the indexed text. A self-reflective loop can judge each answer and refine the query."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Rebuild the vector index.
    ///
    /// Deletes all persisted indices, then reads, chunks, and embeds every
    /// PDF under the data directory into a fresh index. Idempotent; an
    /// empty data directory yields an empty index.
    Index,

    /// Answer a question from the indexed documents.
    ///
    /// Embeds the question, retrieves and reranks matching chunks, and
    /// generates a grounded answer. The self-reflective loop runs unless
    /// disabled here or in the configuration.
    Ask {
        /// The question to answer.
        query: String,

        /// Number of chunks to return (overrides the configured top_k).
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip the self-reflective evaluation loop for this query.
        #[arg(long)]
        no_self_rag: bool,

        /// Print the full response as JSON instead of formatted text.
        #[arg(long)]
        json: bool,
    },

    /// Manage persisted index directories.
    Indices {
        #[command(subcommand)]
        action: IndicesAction,
    },
}

/// Index directory management subcommands.
#[derive(Subcommand)]
enum IndicesAction {
    /// List all persisted index directories.
    List,

    /// Remove all but the most recently modified index directories.
    Prune {
        /// How many index directories to keep (overrides the configured value).
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index => {
            let engine = RagEngine::new(cfg)?;
            let count = engine.rebuild_index().await?;
            println!("Index rebuilt: {} chunks.", count);
        }
        Commands::Ask {
            query,
            top_k,
            no_self_rag,
            json,
        } => {
            let engine = RagEngine::new(cfg)?;
            engine.initialize().await?;
            let response = engine.process_query(&query, top_k, !no_self_rag).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}\n", response.answer);
                for (i, hit) in response.chunks.iter().enumerate() {
                    println!(
                        "  [{}] {} (page {}, score {:.3})",
                        i + 1,
                        hit.source_file,
                        hit.page,
                        hit.score
                    );
                }
                if let Some(report) = &response.self_rag {
                    println!(
                        "\n  self-rag: {} iteration(s), confidence {:.2}",
                        report.iterations.len(),
                        report.final_score
                    );
                }
                println!("\n  answered in {:.2}s", response.processing_time);
            }
        }
        Commands::Indices { action } => {
            let manager = docq::index_manager::IndexManager::new(cfg.index.dir.clone());
            match action {
                IndicesAction::List => {
                    let dirs = manager.list_indices()?;
                    if dirs.is_empty() {
                        println!("No persisted indices.");
                    }
                    for dir in dirs {
                        println!("{}", dir.display());
                    }
                }
                IndicesAction::Prune { keep } => {
                    let keep = keep.unwrap_or(cfg.index.keep_latest);
                    let removed = manager.prune(keep)?;
                    println!("Removed {} index directories (kept {}).", removed, keep);
                }
            }
        }
    }

    Ok(())
}
