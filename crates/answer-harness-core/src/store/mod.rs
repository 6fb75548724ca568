//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the boundary to whatever engine indexes
//! the chunks (Elasticsearch in production, [`memory::InMemoryStore`] in
//! tests and offline setups). The fusion engine talks to it only through
//! these methods.
//!
//! Implementations must be `Send + Sync`; a single handle is shared by all
//! concurrent requests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`keyword_search`](DocumentStore::keyword_search) | Lexical (BM25-style) search |
//! | [`vector_search`](DocumentStore::vector_search) | Nearest neighbours of a query embedding |
//! | [`expansion_search`](DocumentStore::expansion_search) | Learned sparse / term-expansion search |
//! | [`get_by_id`](DocumentStore::get_by_id) | Authoritative full record for a chunk id |
//! | [`ping`](DocumentStore::ping) | Reachability for health reporting |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, SearchHit};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full-text keyword search, best hit first.
    async fn keyword_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Vector similarity search against stored dense vectors.
    async fn vector_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Expansion search (ELSER-style sparse features).
    async fn expansion_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Fetch one chunk by id. `Ok(None)` when the id is unknown.
    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
