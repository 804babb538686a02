use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RagResult;

/// One similarity-search hit. Score semantics follow the collection's metric;
/// for cosine similarity, higher means more similar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityMatch {
    pub text: String,
    pub score: f32,
}

/// A named, dimension- and metric-typed index of (id, vector, text) passages.
///
/// Implementations own passage persistence exclusively; nothing else mutates
/// the collection. `ensure_collection` must succeed before `upsert_texts` or
/// `search` are used — earlier calls fail with `RagError::NotInitialized`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently creates the backing collection and waits (bounded) until
    /// it reports ready. A second call against an existing collection is a
    /// no-op.
    async fn ensure_collection(&self) -> RagResult<()>;

    /// Embeds and stores `texts` in bounded chunks, returning how many
    /// passages were written. Each chunk is an independent unit of failure:
    /// a failing chunk never corrupts previously written ones. Cancellation
    /// is honoured between chunks.
    async fn upsert_texts(&self, texts: &[String], cancel: &CancellationToken)
        -> RagResult<usize>;

    /// Top-k similarity search. Results are sorted by non-increasing score
    /// and truncated to `k`. A cancelled token is checked before any network
    /// traffic happens.
    async fn search(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> RagResult<Vec<SimilarityMatch>>;
}
