//! CLI front ends for `ans ask` and `ans search`.

use anyhow::Result;
use answer_harness_core::models::{QueryRequest, RetrievalMode};
use answer_harness_core::orchestrator::Stage;
use answer_harness_core::prompt::snippet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::services::Services;

/// Answer one question and print the answer followed by its sources.
///
/// Ctrl-C cancels the in-flight completion.
pub async fn run_ask(
    config: &Config,
    services: &Services,
    question: &str,
    mode: RetrievalMode,
    top_k: Option<usize>,
) -> Result<()> {
    let orchestrator = services.orchestrator(config)?;
    let request = QueryRequest::new(question)
        .with_top_k(top_k.unwrap_or(config.retrieval.default_top_k))
        .with_mode(mode);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = orchestrator.answer(&request, &cancel).await;
    watcher.abort();
    let answer = result?;

    println!("{}", answer.text);
    if answer.stage == Stage::Completed && !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for (i, c) in answer.citations.iter().enumerate() {
            println!("{}. {}", i + 1, c.filename);
            if let Some(ref url) = c.url {
                println!("    url: {}", url);
            }
            println!("    excerpt: \"{}\"", snippet(&c.snippet, 200).trim());
        }
    }
    Ok(())
}

/// Run retrieval only and print the fused ranking.
pub async fn run_search(
    config: &Config,
    services: &Services,
    query: &str,
    mode: RetrievalMode,
    top_k: Option<usize>,
) -> Result<()> {
    let engine = services.retrieval(config);
    let k = top_k.unwrap_or(config.retrieval.default_top_k);
    let results = engine.search(query, k, mode).await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{}",
            i + 1,
            r.score,
            r.chunk.filename,
            r.chunk.chunk_index
        );
        if let Some(ref url) = r.chunk.source_url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            snippet(&r.chunk.text, config.generation.citation_snippet_chars).trim()
        );
        println!("    id: {}", r.chunk.id);
        println!();
    }
    Ok(())
}
