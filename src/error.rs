use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the RAG core.
///
/// Transient failures inside the article source and the generator are retried
/// locally; once the local budget is exhausted the error surfaces here with the
/// attempt count attached. `NoRelevantDocuments` is a valid empty-result state,
/// not a failure, and the server layer reports it as such.
#[derive(Debug, Error)]
pub enum RagError {
    /// Caller error, detected before any external call is made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The article search provider kept failing after the retry budget.
    #[error("article source unavailable after {attempts} attempts: {reason}")]
    SourceUnavailable { attempts: u32, reason: String },

    /// The embedding provider failed or returned a malformed (non-numeric-array)
    /// result, including a vector whose length does not match the collection
    /// dimension.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Transport-level failure talking to the vector backend.
    #[error("vector backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A freshly created collection never reported ready within the poll budget.
    #[error("collection '{0}' did not become ready within the poll budget")]
    CollectionNotReady(String),

    /// The vector store was used before `ensure_collection` succeeded.
    #[error("vector store called before collection initialization")]
    NotInitialized,

    /// A single generation attempt exceeded the configured timeout. Timeouts
    /// are not retried, so the caller observes this after exactly one timeout
    /// interval.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// The language-model step kept failing (or kept returning unusably short
    /// text) after the retry budget.
    #[error("generation failed after {attempts} attempts: {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    /// Similarity search found nothing to ground a summary on. Not a failure.
    #[error("no relevant documents found for this query")]
    NoRelevantDocuments,

    /// The caller cancelled the in-flight run; no further page/chunk/retry work
    /// was scheduled.
    #[error("operation cancelled")]
    Cancelled,
}

pub type RagResult<T> = Result<T, RagError>;
