use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde_json::Value;

use crate::config::EmbeddingConfig;
use crate::domain::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};

/// Embedding provider backed by an HTTP feature-extraction endpoint
/// (Hugging-Face-inference style: `POST {endpoint}/models/{model}` with
/// `{"inputs": text}`, answering a JSON array of numbers).
pub struct RemoteEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl RemoteEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
        })
    }
}

/// Pulls a flat vector out of the provider response. Single-input
/// feature-extraction deployments sometimes wrap the vector in an outer
/// one-element array; both shapes are accepted. Anything non-numeric is a
/// malformed result.
fn parse_vector(value: &Value) -> RagResult<Vec<f32>> {
    let outer = value
        .as_array()
        .ok_or_else(|| RagError::EmbeddingFailed("response is not an array".to_string()))?;
    let elements = match outer.first() {
        Some(first) if outer.len() == 1 && first.is_array() => first
            .as_array()
            .expect("checked is_array"),
        _ => outer,
    };
    elements
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::EmbeddingFailed("response contains a non-numeric element".to_string())
            })
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let url = format!("{}/models/{}", self.endpoint, self.model);
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::EmbeddingFailed(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RagError::EmbeddingFailed(format!("non-JSON response: {e}")))?;
        let vector = parse_vector(&value)?;
        if vector.len() != self.dimension {
            return Err(RagError::EmbeddingFailed(format!(
                "vector length {} does not match configured dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-process embedding via fastembed. No credential, no network after the
/// first model download.
pub struct LocalEmbedding {
    model: TextEmbedding,
    dimension: usize,
}

/// Maps a Hugging-Face-style model id onto the fastembed models this crate
/// ships support for.
pub fn local_model_from_name(name: &str) -> Option<EmbeddingModel> {
    if name.ends_with("all-MiniLM-L6-v2") {
        Some(EmbeddingModel::AllMiniLML6V2)
    } else if name.ends_with("bge-small-en-v1.5") {
        Some(EmbeddingModel::BGESmallENV15)
    } else {
        None
    }
}

impl LocalEmbedding {
    pub fn new(model_name: EmbeddingModel, cache_dir: Option<PathBuf>) -> Result<Self> {
        let dimension = TextEmbedding::list_supported_models()
            .iter()
            .find(|m| m.model == model_name)
            .map(|m| m.dim)
            .ok_or_else(|| anyhow!("unknown embedding model: {:?}", model_name))?;

        let mut opts = InitOptions::new(model_name);
        if let Some(dir) = cache_dir {
            opts = opts.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(opts).context("failed to initialize local embedder")?;
        Ok(Self { model, dimension })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| RagError::EmbeddingFailed(e.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailed("model returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| RagError::EmbeddingFailed(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
