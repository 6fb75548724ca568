//! # Answer Harness CLI (`ans`)
//!
//! ## Usage
//!
//! ```bash
//! ans --config ./config/ans.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ans ask "<question>"` | Guarded, grounded answer with citations |
//! | `ans search "<query>"` | Retrieval only; prints the fused ranking |
//! | `ans health` | Probe the store, embedding, and completion services |
//! | `ans serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `answer_harness=info,answer_harness_core=info`).

use anyhow::Result;
use answer_harness::{ask, config, health, server, services::Services};
use answer_harness_core::models::RetrievalMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Answer Harness CLI: guarded retrieval-augmented question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ans.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ans",
    about = "Answer Harness: guarded retrieval-augmented question answering",
    version,
    long_about = "Answer Harness answers questions from an indexed document corpus. \
    Questions are screened for unsafe intent and prompt injection, evidence is retrieved \
    with hybrid search fused by Reciprocal Rank Fusion, and generated answers are only \
    returned when they are grounded in that evidence."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ans.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed corpus.
    ///
    /// Press Ctrl-C to cancel an answer that is still generating.
    Ask {
        question: String,

        /// Retrieval mode: hybrid, keyword (bm25), vector (dense), expansion (elser).
        #[arg(long, default_value = "hybrid")]
        mode: RetrievalMode,

        /// Number of evidence chunks. Defaults to `retrieval.default_top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Search the corpus without generating an answer.
    Search {
        query: String,

        #[arg(long, default_value = "hybrid")]
        mode: RetrievalMode,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Check reachability of the configured services.
    Health,

    /// Start the HTTP server on `server.bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "answer_harness=info,answer_harness_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            question,
            mode,
            top_k,
        } => {
            let services = Services::from_config(&cfg).await?;
            ask::run_ask(&cfg, &services, &question, mode, top_k).await?;
        }
        Commands::Search { query, mode, top_k } => {
            let services = Services::from_config(&cfg).await?;
            ask::run_search(&cfg, &services, &query, mode, top_k).await?;
        }
        Commands::Health => {
            let services = Services::from_config(&cfg).await?;
            health::run_health(&cfg, &services).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
