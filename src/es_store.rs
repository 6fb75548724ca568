//! Elasticsearch-backed [`DocumentStore`] implementation.
//!
//! Talks to the REST API directly with `reqwest`. The index holds one
//! document per chunk:
//!
//! | Field | Type | Maps to |
//! |-------|------|---------|
//! | `id` | keyword | [`Chunk::id`] |
//! | `filename` | keyword | [`Chunk::filename`] |
//! | `drive_url` | keyword | [`Chunk::source_url`] |
//! | `chunk_id` | integer | [`Chunk::chunk_index`] |
//! | `text` | text | [`Chunk::text`] (BM25) |
//! | `text_expansion` | rank_features | [`Chunk::sparse_features`] |
//! | `dense_vector` | dense_vector | [`Chunk::dense_vector`] |
//!
//! Search requests exclude the vector fields from `_source`. Hits whose
//! `_source` is missing or malformed come back as partial hits and are
//! resolved through `GET /{index}/_doc/{id}` if they win fusion.

use anyhow::{bail, Context, Result};
use answer_harness_core::models::{Chunk, SearchHit};
use answer_harness_core::store::DocumentStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::StoreConfig;

/// Lower bound on kNN candidates per shard.
const MIN_NUM_CANDIDATES: usize = 50;

pub struct ElasticsearchStore {
    client: reqwest::Client,
    url: String,
    index: String,
    expansion_model: Option<String>,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            expansion_model: config.expansion_model.clone(),
        })
    }

    async fn search(&self, body: Value) -> Result<Vec<SearchHit>> {
        let resp = self
            .client
            .post(format!("{}/{}/_search", self.url, self.index))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Elasticsearch not reachable at {}", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("Elasticsearch search error {}: {}", status, body_text);
        }

        let json: Value = resp.json().await?;
        parse_search_response(&json)
    }
}

pub fn keyword_query(text: &str, k: usize) -> Value {
    json!({
        "query": { "match": { "text": text } },
        "size": k,
        "_source": { "excludes": ["dense_vector", "text_expansion"] },
    })
}

pub fn knn_query(vector: &[f32], k: usize) -> Value {
    json!({
        "knn": {
            "field": "dense_vector",
            "query_vector": vector,
            "k": k,
            "num_candidates": k.max(MIN_NUM_CANDIDATES),
        },
        "size": k,
        "_source": { "excludes": ["dense_vector", "text_expansion"] },
    })
}

/// `text_expansion` against the configured model, or a plain `match` when
/// no expansion model is deployed.
pub fn expansion_query(text: &str, k: usize, model: Option<&str>) -> Value {
    match model {
        Some(model_id) => json!({
            "query": {
                "text_expansion": {
                    "text_expansion": { "model_id": model_id, "model_text": text }
                }
            },
            "size": k,
            "_source": { "excludes": ["dense_vector", "text_expansion"] },
        }),
        None => keyword_query(text, k),
    }
}

#[derive(Debug, Deserialize)]
struct EsChunkSource {
    #[serde(default)]
    id: Option<String>,
    filename: String,
    #[serde(default)]
    drive_url: Option<String>,
    #[serde(default)]
    chunk_id: i64,
    text: String,
    #[serde(default)]
    dense_vector: Option<Vec<f32>>,
    #[serde(default)]
    text_expansion: Option<BTreeMap<String, f32>>,
}

fn source_to_chunk(doc_id: &str, source: &Value) -> Option<Chunk> {
    let src: EsChunkSource = serde_json::from_value(source.clone()).ok()?;
    Some(Chunk {
        id: src.id.unwrap_or_else(|| doc_id.to_string()),
        filename: src.filename,
        source_url: src.drive_url,
        chunk_index: src.chunk_id,
        text: src.text,
        dense_vector: src.dense_vector,
        sparse_features: src.text_expansion,
    })
}

/// Convert `hits.hits[]` into ranked hits, best first.
///
/// Every hit is keyed by the Elasticsearch `_id`, the same key
/// [`DocumentStore::get_by_id`] addresses, so full and partial hits for one
/// document always fuse together. `_source.id` only survives as
/// [`Chunk::id`] metadata.
pub fn parse_search_response(json: &Value) -> Result<Vec<SearchHit>> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(|h| h.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Elasticsearch response: missing hits.hits"))?;

    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(doc_id) = hit.get("_id").and_then(|i| i.as_str()) else {
            continue;
        };
        let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        let parsed = hit.get("_source").and_then(|s| source_to_chunk(doc_id, s));
        out.push(match parsed {
            Some(chunk) => SearchHit {
                id: doc_id.to_string(),
                chunk: Some(chunk),
                score,
            },
            None => SearchHit::partial(doc_id, score),
        });
    }
    Ok(out)
}

/// Parse a `GET _doc` body. `Ok(None)` when `found` is false.
pub fn parse_get_response(json: &Value) -> Result<Option<Chunk>> {
    if !json.get("found").and_then(|f| f.as_bool()).unwrap_or(false) {
        return Ok(None);
    }
    let doc_id = json.get("_id").and_then(|i| i.as_str()).unwrap_or_default();
    let source = json
        .get("_source")
        .ok_or_else(|| anyhow::anyhow!("Invalid Elasticsearch response: missing _source"))?;
    source_to_chunk(doc_id, source)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("Malformed chunk document: {}", doc_id))
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn keyword_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.search(keyword_query(text, k)).await
    }

    async fn vector_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search(knn_query(vector, k)).await
    }

    async fn expansion_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.search(expansion_query(text, k, self.expansion_model.as_deref()))
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>> {
        let resp = self
            .client
            .get(format!("{}/{}/_doc/{}", self.url, self.index, id))
            .send()
            .await
            .with_context(|| format!("Elasticsearch not reachable at {}", self.url))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("Elasticsearch get error {}: {}", status, body_text);
        }

        let json: Value = resp.json().await?;
        parse_get_response(&json)
    }

    async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Elasticsearch not reachable at {}", self.url))?;
        if !resp.status().is_success() {
            bail!("Elasticsearch returned {}", resp.status());
        }
        Ok(())
    }
}
