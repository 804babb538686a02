use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default config file name, resolved against the working directory.
const DEFAULT_CONFIG_FILE: &str = "scholar_mcp.toml";

/// Similarity metric for the vector collection. Fixed at collection creation;
/// score semantics follow the metric (cosine: higher = more similar).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    #[serde(rename = "cosine")]
    Cosine,
    #[serde(rename = "euclid")]
    Euclid,
    #[serde(rename = "dot")]
    Dot,
}

/// Which embedding implementation to wire in at startup. One instance serves
/// both the ingestion and the query path, so write-time and read-time
/// embeddings always come from the same model.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// HTTP feature-extraction endpoint (Hugging-Face-inference style).
    #[serde(rename = "remote")]
    Remote,
    /// In-process fastembed model.
    #[serde(rename = "local")]
    Local,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the Scholar-style search provider.
    pub base_url: String,
    /// Provider's native page size.
    pub page_size: usize,
    /// Mandatory delay between consecutive page requests, in milliseconds.
    /// Skipping it gets the client blocked provider-side.
    pub request_delay_ms: u64,
    /// Retries per page before the whole fetch fails.
    pub max_retries: u32,
    /// Backoff after a failed page, in milliseconds. Must exceed
    /// `request_delay_ms`.
    pub retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com".to_string(),
            page_size: 10,
            request_delay_ms: 2000,
            max_retries: 3,
            retry_delay_ms: 5000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Remote backend only: endpoint serving `POST /models/{model}`.
    pub endpoint: String,
    pub model: String,
    /// Remote backend credential. Supplied via `SCHOLAR_EMBEDDING__API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Vector dimension; every vector written to or queried against the
    /// collection must have exactly this length.
    pub dimension: usize,
    /// Local backend only: model cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let default_cache_dir = ProjectDirs::from("io", "scholar-mcp", "scholar-mcp")
            .map(|dirs| dirs.cache_dir().to_path_buf());
        Self {
            backend: EmbeddingBackend::Remote,
            endpoint: "https://api-inference.huggingface.co".to_string(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            api_key: None,
            dimension: 384,
            cache_dir: default_cache_dir,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VectorConfig {
    /// Qdrant endpoint URL.
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub collection: String,
    pub metric: Metric,
    /// Upsert chunk size; bounds request size and memory per backend call.
    pub batch_size: usize,
    /// Readiness poll budget for a freshly created collection.
    pub ready_max_attempts: u32,
    pub ready_poll_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection: "research-articles".to_string(),
            metric: Metric::Cosine,
            batch_size: 100,
            ready_max_attempts: 10,
            ready_poll_ms: 5000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Supplied via `SCHOLAR_GENERATION__API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    /// Per-attempt timeout, in seconds.
    pub timeout_secs: u64,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Linear backoff base: the wait after attempt n is `n * base_delay`.
    pub retry_base_delay_ms: u64,
    /// Responses shorter than this (after trimming) count as failures.
    pub min_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-pro".to_string(),
            api_key: None,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 50,
            max_output_tokens: 150,
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 500,
            min_chars: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Loads configuration by layering defaults, an optional TOML file
/// (`SCHOLAR_CONFIG_PATH` or `scholar_mcp.toml`), and `SCHOLAR_`-prefixed
/// environment variables (nested keys split on `__`).
pub fn load_config() -> Result<AppConfig> {
    let config_path_env = std::env::var("SCHOLAR_CONFIG_PATH").ok();
    let config_path = config_path_env
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    if let Some(ref env_path) = config_path_env {
        if !std::path::Path::new(env_path).exists() {
            return Err(anyhow::anyhow!(
                "Config file not found at SCHOLAR_CONFIG_PATH: {}",
                env_path
            ));
        }
        log::info!("SCHOLAR_CONFIG_PATH is set: {}", env_path);
    }

    let figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("SCHOLAR_").split("__"));

    let config: AppConfig = figment.extract().context("Failed to extract AppConfig")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<()> {
    if config.source.page_size == 0 {
        return Err(anyhow::anyhow!("source.page_size must be greater than zero"));
    }
    if config.source.retry_delay_ms <= config.source.request_delay_ms {
        return Err(anyhow::anyhow!(
            "source.retry_delay_ms ({}) must exceed source.request_delay_ms ({})",
            config.source.retry_delay_ms,
            config.source.request_delay_ms
        ));
    }
    if config.embedding.dimension == 0 {
        return Err(anyhow::anyhow!(
            "embedding.dimension must be greater than zero"
        ));
    }
    if config.vector.collection.trim().is_empty() {
        return Err(anyhow::anyhow!("vector.collection cannot be empty"));
    }
    if config.vector.batch_size == 0 {
        return Err(anyhow::anyhow!("vector.batch_size must be greater than zero"));
    }
    if config.generation.min_chars == 0 {
        return Err(anyhow::anyhow!("generation.min_chars must be greater than zero"));
    }
    Ok(())
}
