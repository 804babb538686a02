use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::article::Article;
use crate::domain::generation::{GenerationOptions, Generator};
use crate::domain::rag::{IngestReport, RagService, SummaryReport};
use crate::domain::source::ArticleSource;
use crate::domain::vector_store::{SimilarityMatch, VectorStore};
use crate::error::{RagError, RagResult};

/// Retrieval depth when the caller does not ask for a specific limit.
pub const DEFAULT_TOP_K: usize = 5;

/// Builds the grounding prompt from the query and the retrieved passages,
/// which arrive already sorted by relevance.
fn build_prompt(query: &str, matches: &[SimilarityMatch]) -> String {
    let context = matches
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("Summarize the latest research on {query}:\n{context}")
}

/// Wires the article source, the vector store and the generator into the two
/// end-to-end flows.
pub struct RagServiceImpl {
    source: Arc<dyn ArticleSource>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    options: GenerationOptions,
}

impl RagServiceImpl {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            source,
            store,
            generator,
            options,
        }
    }
}

#[async_trait]
impl RagService for RagServiceImpl {
    async fn ingest(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> RagResult<IngestReport> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query cannot be empty".to_string()));
        }
        if count == 0 {
            return Ok(IngestReport::empty());
        }

        let articles = self.source.fetch(query, count, cancel).await?;
        log::info!("Fetched {} articles for query '{}'", articles.len(), query);

        let abstracts: Vec<String> = articles
            .iter()
            .filter(|article| article.has_abstract())
            .map(|article| article.abstract_text.clone())
            .collect();
        if abstracts.is_empty() {
            log::warn!("No abstracts to store for query '{}'", query);
            return Ok(IngestReport {
                articles,
                abstracts_stored: 0,
            });
        }

        let abstracts_stored = self.store.upsert_texts(&abstracts, cancel).await?;
        Ok(IngestReport {
            articles,
            abstracts_stored,
        })
    }

    async fn summarize(
        &self,
        query: &str,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> RagResult<SummaryReport> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query cannot be empty".to_string()));
        }

        let k = limit.unwrap_or(DEFAULT_TOP_K);
        let matches = self.store.search(query, k, cancel).await?;
        if matches.is_empty() {
            return Err(RagError::NoRelevantDocuments);
        }
        log::info!(
            "Retrieved {} passages for query '{}', generating summary",
            matches.len(),
            query
        );

        let prompt = build_prompt(query, &matches);
        let summary = self.generator.generate(&prompt, &self.options, cancel).await?;
        Ok(SummaryReport {
            summary,
            sources_count: matches.len(),
        })
    }
}
