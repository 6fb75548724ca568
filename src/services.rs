//! Service wiring.
//!
//! Builds the store, embedder, and completer named in the config and hands
//! them to the core engine as trait objects. Both the CLI and the HTTP
//! server go through [`Services::from_config`].

use anyhow::{bail, Context, Result};
use answer_harness_core::completion::Completer;
use answer_harness_core::embedding::Embedder;
use answer_harness_core::fusion::RetrievalEngine;
use answer_harness_core::guardrail::Guardrails;
use answer_harness_core::models::{chunk_id, Chunk};
use answer_harness_core::orchestrator::Orchestrator;
use answer_harness_core::store::memory::InMemoryStore;
use answer_harness_core::store::DocumentStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::completion::create_completer;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::es_store::ElasticsearchStore;

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn DocumentStore>,
    pub embedder: Arc<dyn Embedder>,
    pub completer: Arc<dyn Completer>,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let completer = create_completer(&config.completion)?;

        let store: Arc<dyn DocumentStore> = match config.store.backend.as_str() {
            "elasticsearch" => Arc::new(ElasticsearchStore::new(&config.store)?),
            "memory" => {
                let path = config
                    .store
                    .chunks_path
                    .as_deref()
                    .context("store.chunks_path required for memory backend")?;
                let mut store = InMemoryStore::new(load_chunks(path)?);
                if config.embedding.is_enabled() {
                    let embedded = store
                        .embed_missing(embedder.as_ref())
                        .await
                        .context("Failed to embed seed chunks")?;
                    info!(chunks = store.len(), embedded, "memory store ready");
                }
                Arc::new(store)
            }
            other => bail!("Unknown store backend: {}", other),
        };

        Ok(Self {
            store,
            embedder,
            completer,
        })
    }

    pub fn retrieval(&self, config: &Config) -> RetrievalEngine {
        RetrievalEngine::new(
            self.store.clone(),
            self.embedder.clone(),
            config.retrieval.fusion_params(),
        )
    }

    pub fn orchestrator(&self, config: &Config) -> Result<Orchestrator> {
        let guardrails = Guardrails::new(&config.guardrails.policy(), self.embedder.clone())
            .context("Invalid guardrail pattern")?;
        Ok(Orchestrator::new(
            Arc::new(self.retrieval(config)),
            guardrails,
            self.completer.clone(),
            config.orchestrator_config(),
        ))
    }
}

/// One entry of a memory-backend seed file. Accepts the Elasticsearch field
/// names (`drive_url`, `chunk_id`, `text_expansion`) as aliases.
#[derive(Debug, Deserialize)]
struct ChunkRecord {
    #[serde(default)]
    id: Option<String>,
    filename: String,
    #[serde(default, alias = "drive_url")]
    source_url: Option<String>,
    #[serde(default, alias = "chunk_id")]
    chunk_index: i64,
    text: String,
    #[serde(default)]
    dense_vector: Option<Vec<f32>>,
    #[serde(default, alias = "text_expansion")]
    sparse_features: Option<BTreeMap<String, f32>>,
}

/// Read a JSON array of chunks. Missing ids are derived from
/// `(filename, chunk_index)`.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunks file: {}", path.display()))?;
    parse_chunks(&content).with_context(|| format!("Invalid chunks file: {}", path.display()))
}

pub fn parse_chunks(content: &str) -> Result<Vec<Chunk>> {
    let records: Vec<ChunkRecord> = serde_json::from_str(content)?;
    Ok(records
        .into_iter()
        .map(|r| Chunk {
            id: r.id.unwrap_or_else(|| chunk_id(&r.filename, r.chunk_index)),
            filename: r.filename,
            source_url: r.source_url,
            chunk_index: r.chunk_index,
            text: r.text,
            dense_vector: r.dense_vector,
            sparse_features: r.sparse_features,
        })
        .collect())
}
