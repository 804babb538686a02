use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RagResult;

/// Sampling parameters forwarded to the generation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 50,
            max_output_tokens: 150,
        }
    }
}

/// A finite, non-restartable sequence of generated text chunks.
pub type TextChunkStream = BoxStream<'static, RagResult<String>>;

/// Wraps a text-generation capability.
///
/// Prompts are sanitized before sending (best-effort normalization against
/// provider-side format errors, not a security boundary). Calls run under a
/// per-attempt timeout; transient failures and unusably short responses are
/// retried with linear backoff within the configured budget. Cancelling the
/// token stops further attempts from being scheduled, including during
/// backoff waits.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> RagResult<String>;

    /// Opens a streaming generation. The same sanitization applies before the
    /// stream starts; there is no retry mid-stream — a stream error propagates
    /// immediately and a fresh call is the caller's recourse. Dropping the
    /// stream cancels the underlying call.
    async fn generate_streaming(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> RagResult<TextChunkStream>;
}
