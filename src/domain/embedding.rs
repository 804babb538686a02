use async_trait::async_trait;

use crate::error::RagResult;

/// Converts text into fixed-dimension vectors.
///
/// The vector store holds exactly one provider instance and uses it on both
/// the write and the read path, which is what keeps query-time and
/// ingestion-time embeddings comparable. Swapping providers against a
/// populated collection silently degrades relevance; there is no error signal
/// for that, so don't.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds one text. The result length always equals `dimension()`.
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    /// Embeds a batch. Default is sequential; callers that want intra-batch
    /// concurrency fan out over `embed` themselves.
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize;
}
