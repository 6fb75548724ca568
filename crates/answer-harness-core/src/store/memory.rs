//! In-memory [`DocumentStore`] implementation for testing and offline use.
//!
//! Chunks are loaded once and never mutated, so no locking is needed.
//! Keyword search counts matching query terms, vector search is brute-force
//! cosine similarity over stored dense vectors, and expansion search sums
//! sparse feature weights for the query terms. When no chunk carries sparse
//! features, expansion search falls back to keyword scoring.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Chunk, SearchHit};

use super::DocumentStore;

pub struct InMemoryStore {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
    partial_vector_hits: bool,
}

impl InMemoryStore {
    /// Build a store from chunks. Later duplicates of an id are ignored.
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let mut kept = Vec::with_capacity(chunks.len());
        let mut by_id = HashMap::new();
        for chunk in chunks {
            if by_id.contains_key(&chunk.id) {
                continue;
            }
            by_id.insert(chunk.id.clone(), kept.len());
            kept.push(chunk);
        }
        Self {
            chunks: kept,
            by_id,
            partial_vector_hits: false,
        }
    }

    /// Return id-only hits from vector search, like backends that strip
    /// `_source` from kNN responses.
    pub fn with_partial_vector_hits(mut self, partial: bool) -> Self {
        self.partial_vector_hits = partial;
        self
    }

    /// Embed every chunk that has no dense vector yet.
    pub async fn embed_missing(&mut self, embedder: &dyn Embedder) -> Result<usize> {
        let missing: Vec<usize> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.dense_vector.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|&i| self.chunks[i].text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != missing.len() {
            anyhow::bail!(
                "Embedding count mismatch: expected {}, got {}",
                missing.len(),
                vectors.len()
            );
        }
        for (i, v) in missing.iter().zip(vectors) {
            self.chunks[*i].dense_vector = Some(v);
        }
        Ok(missing.len())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn rank(&self, mut scored: Vec<(usize, f64)>, k: usize, partial: bool) -> Vec<SearchHit> {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                if partial {
                    SearchHit::partial(chunk.id.clone(), score)
                } else {
                    SearchHit::full(chunk.clone(), score)
                }
            })
            .collect()
    }

    fn keyword_scores(&self, text: &str) -> Vec<(usize, f64)> {
        let query_lower = text.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Vec::new();
        }
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let text_lower = c.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                (matches > 0).then_some((i, matches as f64))
            })
            .collect()
    }
}

fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn keyword_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        Ok(self.rank(self.keyword_scores(text), k, false))
    }

    async fn vector_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let scored: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.dense_vector
                    .as_ref()
                    .map(|v| (i, cosine_similarity(vector, v) as f64))
            })
            .collect();
        Ok(self.rank(scored, k, self.partial_vector_hits))
    }

    async fn expansion_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if self.chunks.iter().all(|c| c.sparse_features.is_none()) {
            return Ok(self.rank(self.keyword_scores(text), k, false));
        }

        let terms = query_terms(text);
        let scored: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let features = c.sparse_features.as_ref()?;
                let weight: f32 = terms.iter().filter_map(|t| features.get(t)).sum();
                (weight > 0.0).then_some((i, weight as f64))
            })
            .collect();
        Ok(self.rank(scored, k, false))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self.by_id.get(id).map(|&i| self.chunks[i].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use std::collections::BTreeMap;

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::new("docker.pdf", None, 0, "Docker is a containerization tool"),
            Chunk::new("k8s.pdf", None, 0, "Kubernetes orchestrates Docker containers"),
            Chunk::new("cooking.pdf", None, 0, "Bake the bread for forty minutes"),
        ]
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_by_matching_terms() {
        let store = InMemoryStore::new(corpus());
        let hits = store.keyword_search("docker containerization", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.as_ref().unwrap().filename, "docker.pdf");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_keyword_search_respects_k() {
        let store = InMemoryStore::new(corpus());
        let hits = store.keyword_search("docker", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_requires_vectors() {
        let embedder = HashingEmbedder::new(256);
        let mut store = InMemoryStore::new(corpus());
        let q = embedder.embed_text("docker containerization tool");
        assert!(store.vector_search(&q, 5).await.unwrap().is_empty());

        assert_eq!(store.embed_missing(&embedder).await.unwrap(), 3);
        let hits = store.vector_search(&q, 5).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.as_ref().unwrap().filename, "docker.pdf");
    }

    #[tokio::test]
    async fn test_partial_vector_hits_carry_only_ids() {
        let embedder = HashingEmbedder::new(256);
        let mut store = InMemoryStore::new(corpus()).with_partial_vector_hits(true);
        store.embed_missing(&embedder).await.unwrap();
        let hits = store
            .vector_search(&embedder.embed_text("bread"), 1)
            .await
            .unwrap();
        assert!(hits[0].chunk.is_none());
        let full = store.get_by_id(&hits[0].id).await.unwrap().unwrap();
        assert_eq!(full.filename, "cooking.pdf");
    }

    #[tokio::test]
    async fn test_expansion_uses_sparse_features() {
        let mut chunks = corpus();
        let mut features = BTreeMap::new();
        features.insert("oven".to_string(), 2.5);
        chunks[2].sparse_features = Some(features);
        let store = InMemoryStore::new(chunks);

        let hits = store.expansion_search("oven temperature", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.as_ref().unwrap().filename, "cooking.pdf");
        assert!((hits[0].score - 2.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_expansion_falls_back_to_keyword() {
        let store = InMemoryStore::new(corpus());
        let hits = store.expansion_search("kubernetes", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_ignored() {
        let mut chunks = corpus();
        chunks.push(Chunk::new("docker.pdf", None, 0, "shadow copy"));
        let store = InMemoryStore::new(chunks);
        assert_eq!(store.len(), 3);
        let c = store
            .get_by_id(&crate::models::chunk_id("docker.pdf", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.text, "Docker is a containerization tool");
    }
}
