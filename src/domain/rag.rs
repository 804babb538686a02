use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::article::Article;
use crate::error::RagResult;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub articles: Vec<Article>,
    /// Number of non-empty abstracts written to the vector store. Zero is a
    /// valid outcome, not an error.
    pub abstracts_stored: usize,
}

impl IngestReport {
    pub fn empty() -> Self {
        Self {
            articles: Vec::new(),
            abstracts_stored: 0,
        }
    }

    pub fn articles_fetched(&self) -> usize {
        self.articles.len()
    }
}

/// Outcome of one summarize run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryReport {
    pub summary: String,
    /// How many stored passages grounded the summary.
    pub sources_count: usize,
}

/// The two end-to-end RAG flows.
#[async_trait]
pub trait RagService: Send + Sync {
    /// Ingestion pipeline: fetch up to `count` articles for `query`, embed the
    /// non-empty abstracts, and store them. `count == 0` or a result set with
    /// no abstracts yields a report with `abstracts_stored = 0`.
    async fn ingest(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> RagResult<IngestReport>;

    /// Query pipeline: retrieve the top-`limit` stored passages for `query`
    /// (default 5), compose a grounding prompt, and generate a summary.
    /// An empty retrieval yields `RagError::NoRelevantDocuments`.
    async fn summarize(
        &self,
        query: &str,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> RagResult<SummaryReport>;
}
