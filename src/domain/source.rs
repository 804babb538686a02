use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::article::Article;
use crate::error::RagResult;

/// Paginated access to an external article search provider.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetches up to `count` articles matching `query`, in provider order.
    ///
    /// The returned sequence is never longer than `count`. Page-level failures
    /// are retried internally; exhaustion surfaces as
    /// `RagError::SourceUnavailable`. Cancelling the token stops the page loop
    /// before the next page or retry is scheduled.
    async fn fetch(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> RagResult<Vec<Article>>;
}
