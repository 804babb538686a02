use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use qdrant_client::Qdrant;

use crate::application::RagServiceImpl;
use crate::config::{AppConfig, EmbeddingBackend};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::generation::GenerationOptions;
use crate::domain::rag::RagService;
use crate::domain::vector_store::VectorStore;
use crate::infrastructure::embedding::local_model_from_name;
use crate::infrastructure::{
    GeminiGenerator, LocalEmbedding, QdrantVectorStore, RemoteEmbedding, ScholarSource,
};

/// Lifecycle of the RAG service behind the server handler.
///
/// The process starts serving immediately in `Initializing`; tool calls that
/// need the service are rejected until the background task lands in `Ready`.
/// `Failed` is terminal for the process.
pub enum ServiceState {
    Initializing,
    Ready(Arc<dyn RagService>),
    Failed(String),
}

impl ServiceState {
    pub fn describe(&self) -> &'static str {
        match self {
            ServiceState::Initializing => "initializing",
            ServiceState::Ready(_) => "ready",
            ServiceState::Failed(_) => "failed",
        }
    }
}

async fn build_embedder(config: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.backend {
        EmbeddingBackend::Remote => Arc::new(RemoteEmbedding::new(&config.embedding)?),
        EmbeddingBackend::Local => {
            let model = local_model_from_name(&config.embedding.model).ok_or_else(|| {
                anyhow!(
                    "embedding model '{}' is not available locally",
                    config.embedding.model
                )
            })?;
            let cache_dir = config.embedding.cache_dir.clone();
            // Model download and load are blocking.
            let local = tokio::task::spawn_blocking(move || LocalEmbedding::new(model, cache_dir))
                .await
                .context("embedding model load task failed")??;
            Arc::new(local)
        }
    };
    if embedder.dimension() != config.embedding.dimension {
        return Err(anyhow!(
            "embedding backend produces {}-dimensional vectors but the configuration says {}",
            embedder.dimension(),
            config.embedding.dimension
        ));
    }
    Ok(embedder)
}

/// Builds the full dependency graph and brings the vector collection up.
/// Any failure here is fatal to the process.
pub async fn build_rag_service(config: &AppConfig) -> Result<Arc<dyn RagService>> {
    let embedder = build_embedder(config).await?;
    log::info!(
        "Embedding backend ready ({} dimensions)",
        embedder.dimension()
    );

    let client = Qdrant::from_url(&config.vector.url)
        .api_key(config.vector.api_key.clone())
        .build()
        .context("failed to connect to the vector backend")?;
    let store = Arc::new(QdrantVectorStore::new(
        client,
        embedder,
        &config.vector,
    )?);
    store
        .ensure_collection()
        .await
        .context("vector collection initialization failed")?;

    let source = Arc::new(ScholarSource::new(config.source.clone())?);
    let generator = Arc::new(GeminiGenerator::new(&config.generation)?);
    let options = GenerationOptions {
        temperature: config.generation.temperature,
        top_p: config.generation.top_p,
        top_k: config.generation.top_k,
        max_output_tokens: config.generation.max_output_tokens,
    };

    Ok(Arc::new(RagServiceImpl::new(
        source, store, generator, options,
    )))
}

/// Runs the full initialization and publishes the outcome into `state`.
/// Callers treat an `Err` as fatal and terminate the process.
pub async fn initialize_background_services(
    config: AppConfig,
    state: Arc<Mutex<ServiceState>>,
) -> Result<()> {
    log::info!("Starting background service initialization...");
    match build_rag_service(&config).await {
        Ok(service) => {
            *state.lock().unwrap() = ServiceState::Ready(service);
            log::info!("Background service initialization complete");
            Ok(())
        }
        Err(e) => {
            log::error!("Background service initialization failed: {e:#}");
            *state.lock().unwrap() = ServiceState::Failed(format!("{e:#}"));
            Err(e)
        }
    }
}
