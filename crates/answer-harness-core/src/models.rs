//! Core data models shared by the retrieval, guardrail, and generation
//! stages.
//!
//! Chunks are produced by an out-of-band ingestion step and are treated as
//! immutable here. Search strategies return [`SearchHit`]s whose scores are
//! only meaningful within one strategy; the fusion engine turns them into
//! [`FusedChunk`]s whose scores are comparable across the whole list.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A fragment of an indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, see [`chunk_id`].
    pub id: String,
    /// Name of the source file (e.g. `"handbook.pdf"`).
    pub filename: String,
    /// Browsable location of the source file, if known.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Zero-based position of the chunk within its file.
    pub chunk_index: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_features: Option<BTreeMap<String, f32>>,
}

impl Chunk {
    /// Build a chunk with a derived id and no vectors.
    pub fn new(
        filename: impl Into<String>,
        source_url: Option<String>,
        chunk_index: i64,
        text: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: chunk_id(&filename, chunk_index),
            filename,
            source_url,
            chunk_index,
            text: text.into(),
            dense_vector: None,
            sparse_features: None,
        }
    }
}

/// Derive the deterministic chunk id for `(filename, chunk_index)`.
///
/// SHA-256 over `{filename byte length}:{filename}:{chunk_index}`, hex
/// encoded. The length prefix keeps the encoding unambiguous, so
/// `("report1", 23)` and `("report12", 3)` get different ids.
pub fn chunk_id(filename: &str, chunk_index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", filename.len(), filename, chunk_index).as_bytes());
    hex::encode(hasher.finalize())
}

/// One ranked entry from a single search strategy.
///
/// `chunk` is `None` when the backend only returned a partial record for
/// the hit; the fusion engine fetches the full record for such ids if they
/// survive into the final ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub chunk: Option<Chunk>,
    /// Strategy-specific relevance (BM25, cosine, expansion weight).
    pub score: f64,
}

impl SearchHit {
    pub fn full(chunk: Chunk, score: f64) -> Self {
        Self {
            id: chunk.id.clone(),
            chunk: Some(chunk),
            score,
        }
    }

    pub fn partial(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            chunk: None,
            score,
        }
    }
}

/// An ordered result list from one strategy.
pub type SearchResult = Vec<SearchHit>;

/// A chunk with its fused relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Retrieval strategy requested by a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Keyword, vector, and expansion fused with RRF.
    #[default]
    Hybrid,
    #[serde(alias = "bm25")]
    Keyword,
    #[serde(alias = "dense")]
    Vector,
    #[serde(alias = "elser")]
    Expansion,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Hybrid => "hybrid",
            RetrievalMode::Keyword => "keyword",
            RetrievalMode::Vector => "vector",
            RetrievalMode::Expansion => "expansion",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(RetrievalMode::Hybrid),
            "keyword" | "bm25" => Ok(RetrievalMode::Keyword),
            "vector" | "dense" => Ok(RetrievalMode::Vector),
            "expansion" | "elser" => Ok(RetrievalMode::Expansion),
            other => Err(format!(
                "Unknown retrieval mode: {}. Use hybrid, keyword, vector, or expansion.",
                other
            )),
        }
    }
}

/// Caller-facing question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: RetrievalMode,
}

fn default_top_k() -> usize {
    5
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: default_top_k(),
            mode: RetrievalMode::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Source attribution attached to an accepted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub filename: String,
    pub url: Option<String>,
    pub snippet: String,
}

/// Caller-facing answer shape: `{answer, citations}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        assert_eq!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 3));
        assert_ne!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 4));
        assert_ne!(chunk_id("a.pdf", 3), chunk_id("b.pdf", 3));
        assert_eq!(chunk_id("a.pdf", 0).len(), 64);
    }

    #[test]
    fn test_chunk_id_filename_index_boundary() {
        assert_ne!(chunk_id("report1", 23), chunk_id("report12", 3));
        assert_ne!(chunk_id("a:1", 2), chunk_id("a", 12));
        assert_ne!(chunk_id("x", -1), chunk_id("x-", 1));
    }

    #[test]
    fn test_chunk_new_derives_id() {
        let c = Chunk::new("guide.pdf", None, 2, "text");
        assert_eq!(c.id, chunk_id("guide.pdf", 2));
        assert!(c.dense_vector.is_none());
    }

    #[test]
    fn test_mode_parse_and_aliases() {
        assert_eq!("hybrid".parse::<RetrievalMode>(), Ok(RetrievalMode::Hybrid));
        assert_eq!("BM25".parse::<RetrievalMode>(), Ok(RetrievalMode::Keyword));
        assert_eq!("dense".parse::<RetrievalMode>(), Ok(RetrievalMode::Vector));
        assert_eq!("elser".parse::<RetrievalMode>(), Ok(RetrievalMode::Expansion));
        assert!("fuzzy".parse::<RetrievalMode>().is_err());
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"question":"What is Docker?"}"#).unwrap();
        assert_eq!(req.top_k, 5);
        assert_eq!(req.mode, RetrievalMode::Hybrid);

        let req: QueryRequest =
            serde_json::from_str(r#"{"question":"q","topK":2,"mode":"bm25"}"#).unwrap();
        assert_eq!(req.top_k, 2);
        assert_eq!(req.mode, RetrievalMode::Keyword);
    }

    #[test]
    fn test_query_request_rejects_unknown_mode() {
        let res = serde_json::from_str::<QueryRequest>(r#"{"question":"q","mode":"fuzzy"}"#);
        assert!(res.is_err());
    }
}
