//! Retrieval fusion engine: keyword, vector, and expansion search merged
//! with Reciprocal Rank Fusion.
//!
//! Each strategy delegates to the [`DocumentStore`] and degrades to an empty
//! list when the store (or, for vector search, the embedder) fails. Fusion
//! never looks at raw scores, only at ranks, so BM25 scores, cosine
//! similarities, and expansion weights can be combined without
//! normalization.
//!
//! # Scoring
//!
//! 1. For every list, the hit at zero-based rank `r` adds
//!    `1 / (rrf_constant + r + 1)` to the accumulator of its chunk id.
//! 2. Sort by accumulated score (desc), then chunk id (asc).
//! 3. Truncate to `k`.
//! 4. Materialize: reuse a full record returned by any strategy, otherwise
//!    fetch it with [`DocumentStore::get_by_id`]. Winners that cannot be
//!    fetched are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::AnswerError;
use crate::models::{Chunk, FusedChunk, RetrievalMode, SearchHit, SearchResult};
use crate::store::DocumentStore;

/// Smoothing constant from the original RRF paper.
pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

/// Fusion tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct FusionParams {
    /// `k` in `1 / (k + rank)`. Larger values flatten the rank curve.
    pub rrf_constant: f64,
    /// Per-strategy candidate depth for hybrid search. `None` uses the
    /// requested `k`; smaller values are raised to `k`.
    pub candidate_k: Option<usize>,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            rrf_constant: DEFAULT_RRF_CONSTANT,
            candidate_k: None,
        }
    }
}

/// Runs search strategies against a shared store and fuses their output.
pub struct RetrievalEngine {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    params: FusionParams,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        params: FusionParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    fn candidate_k(&self, k: usize) -> usize {
        self.params.candidate_k.map_or(k, |c| c.max(k))
    }

    /// Keyword (lexical) search. Empty on failure.
    pub async fn search_keyword(&self, query: &str, k: usize) -> SearchResult {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        match self.store.keyword_search(query, k).await {
            Ok(hits) => strategy_hits("keyword", hits, k),
            Err(e) => degrade("keyword", e),
        }
    }

    /// Dense vector search. The query is embedded first; an embedding
    /// failure degrades the strategy the same way a store failure does.
    pub async fn search_vector(&self, query: &str, k: usize) -> SearchResult {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let query_vec = match self.embedder.embed_one(query).await {
            Ok(v) => v,
            Err(e) => {
                let err = AnswerError::UpstreamEmbedding(format!("{:#}", e));
                warn!(strategy = "vector", error = %err, "strategy degraded to empty result");
                return Vec::new();
            }
        };
        match self.store.vector_search(&query_vec, k).await {
            Ok(hits) => strategy_hits("vector", hits, k),
            Err(e) => degrade("vector", e),
        }
    }

    /// Expansion (learned sparse) search. Empty on failure.
    pub async fn search_expansion(&self, query: &str, k: usize) -> SearchResult {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        match self.store.expansion_search(query, k).await {
            Ok(hits) => strategy_hits("expansion", hits, k),
            Err(e) => degrade("expansion", e),
        }
    }

    /// Fuse ranked lists and materialize the top `k` chunks.
    pub async fn fuse(&self, lists: &[SearchResult], k: usize) -> Vec<FusedChunk> {
        if k == 0 {
            return Vec::new();
        }

        let mut ranked = rrf_rank(lists, self.params.rrf_constant);
        ranked.truncate(k);
        if ranked.is_empty() {
            return Vec::new();
        }

        let mut known: HashMap<&str, &Chunk> = HashMap::new();
        for hit in lists.iter().flatten() {
            if let Some(chunk) = &hit.chunk {
                known.entry(hit.id.as_str()).or_insert(chunk);
            }
        }

        let lookups = ranked.iter().map(|(id, _)| {
            let cached = known.get(id.as_str()).map(|c| (*c).clone());
            let store = &self.store;
            async move {
                match cached {
                    Some(chunk) => Some(chunk),
                    None => match store.get_by_id(id).await {
                        Ok(Some(chunk)) => Some(chunk),
                        Ok(None) => {
                            warn!(chunk_id = %id, "fused winner missing from store, dropped");
                            None
                        }
                        Err(e) => {
                            let err = format!("{:#}", e);
                            warn!(chunk_id = %id, error = %err, "failed to fetch fused winner, dropped");
                            None
                        }
                    },
                }
            }
        });
        let chunks = join_all(lookups).await;

        let fused: Vec<FusedChunk> = ranked
            .into_iter()
            .zip(chunks)
            .filter_map(|((_, score), chunk)| chunk.map(|chunk| FusedChunk { chunk, score }))
            .collect();

        debug!(lists = lists.len(), fused = fused.len(), "rrf fusion complete");
        fused
    }

    /// Keyword, vector, and expansion search run concurrently, then fused.
    pub async fn search_hybrid(&self, query: &str, k: usize) -> Vec<FusedChunk> {
        let ck = self.candidate_k(k);
        let (keyword, vector, expansion) = futures::join!(
            self.search_keyword(query, ck),
            self.search_vector(query, ck),
            self.search_expansion(query, ck),
        );
        self.fuse(&[keyword, vector, expansion], k).await
    }

    /// Dispatch on [`RetrievalMode`]. Single-strategy modes still pass
    /// through [`fuse`](Self::fuse) so callers always receive full records
    /// with comparable scores.
    pub async fn search(&self, query: &str, k: usize, mode: RetrievalMode) -> Vec<FusedChunk> {
        match mode {
            RetrievalMode::Hybrid => self.search_hybrid(query, k).await,
            RetrievalMode::Keyword => {
                let hits = self.search_keyword(query, k).await;
                self.fuse(&[hits], k).await
            }
            RetrievalMode::Vector => {
                let hits = self.search_vector(query, k).await;
                self.fuse(&[hits], k).await
            }
            RetrievalMode::Expansion => {
                let hits = self.search_expansion(query, k).await;
                self.fuse(&[hits], k).await
            }
        }
    }
}

fn strategy_hits(strategy: &str, mut hits: Vec<SearchHit>, k: usize) -> SearchResult {
    hits.truncate(k);
    debug!(strategy, hits = hits.len(), "strategy returned");
    hits
}

fn degrade(strategy: &str, e: anyhow::Error) -> SearchResult {
    let err = AnswerError::UpstreamSearch {
        strategy: strategy.to_string(),
        message: format!("{:#}", e),
    };
    warn!(strategy, error = %err, "strategy degraded to empty result");
    Vec::new()
}

/// Reciprocal Rank Fusion over chunk ids.
///
/// Returns every id seen in `lists` with its fused score, sorted by score
/// (desc) then id (asc). Pure and deterministic.
pub fn rrf_rank(lists: &[SearchResult], rrf_constant: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            *scores.entry(hit.id.as_str()).or_default() += 1.0 / (rrf_constant + rank as f64 + 1.0);
        }
    }

    let mut ranked: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
