use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind as QdrantValueKind;
use qdrant_client::qdrant::{
    CollectionStatus, CreateCollectionBuilder, Distance, GetCollectionInfoResponse, PointId,
    PointStruct, SearchPoints, UpsertPointsBuilder, VectorParams, Vectors, WithPayloadSelector,
    WithVectorsSelector,
};
use qdrant_client::{Payload, Qdrant};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Metric, VectorConfig};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::vector_store::{SimilarityMatch, VectorStore};
use crate::error::{RagError, RagResult};
use crate::retry::{Backoff, RetryError, RetryPolicy};

impl From<Metric> for Distance {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Cosine => Distance::Cosine,
            Metric::Euclid => Distance::Euclid,
            Metric::Dot => Distance::Dot,
        }
    }
}

/// Deterministic passage id: a UUID carved out of the SHA-256 of the text.
/// Re-ingesting identical text upserts the same point instead of accumulating
/// duplicates.
fn passage_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// A collection counts as ready only once the backend reports it green.
/// Yellow (optimizing) and grey (unknown) answers keep the poll going.
fn collection_ready(info: &GetCollectionInfoResponse) -> Result<(), String> {
    match &info.result {
        Some(collection) if collection.status() == CollectionStatus::Green => Ok(()),
        Some(collection) => Err(format!(
            "collection status is {:?}",
            collection.status()
        )),
        None => Err("collection info response carried no collection".to_string()),
    }
}

/// Descending by score, ties kept stable.
fn sort_matches(matches: &mut [SimilarityMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Qdrant-backed passage index. Embeds with the injected provider on both the
/// write and the read path, so the embedding-model identity invariant holds by
/// construction.
pub struct QdrantVectorStore {
    client: Qdrant,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    dimension: usize,
    metric: Metric,
    batch_size: usize,
    ready_poll: RetryPolicy,
    ready: AtomicBool,
}

impl QdrantVectorStore {
    pub fn new(
        client: Qdrant,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &VectorConfig,
    ) -> Result<Self> {
        if config.collection.trim().is_empty() {
            return Err(anyhow!("Collection name cannot be empty"));
        }
        let dimension = embedder.dimension();
        if dimension == 0 {
            return Err(anyhow!("Vector dimension must be greater than zero"));
        }
        let ready_poll = RetryPolicy::new(
            config.ready_max_attempts,
            Duration::from_millis(config.ready_poll_ms),
            Backoff::Fixed,
        );
        Ok(Self {
            client,
            embedder,
            collection: config.collection.clone(),
            dimension,
            metric: config.metric,
            batch_size: config.batch_size,
            ready_poll,
            ready: AtomicBool::new(false),
        })
    }

    async fn create_collection(&self) -> RagResult<()> {
        log::info!(
            "Creating collection '{}' with dimension {} and metric {:?}",
            self.collection,
            self.dimension,
            self.metric
        );
        let vector_params = VectorParams {
            size: self.dimension as u64,
            distance: Distance::from(self.metric).into(),
            hnsw_config: None,
            quantization_config: None,
            on_disk: None,
            multivector_config: None,
            datatype: None,
        };
        let builder =
            CreateCollectionBuilder::new(self.collection.clone()).vectors_config(vector_params);
        self.client
            .create_collection(builder)
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("create_collection failed: {e}")))?;
        Ok(())
    }

    /// Polls `collection_info` until the new collection reports green status,
    /// within the configured budget.
    async fn wait_until_ready(&self) -> RagResult<()> {
        let never = CancellationToken::new();
        self.ready_poll
            .run(&never, |_| true, |attempt| async move {
                log::debug!(
                    "Waiting for collection '{}' (attempt {})",
                    self.collection,
                    attempt
                );
                self.client
                    .collection_info(&self.collection)
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|info| collection_ready(&info))
            })
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => RagError::Cancelled,
                _ => RagError::CollectionNotReady(self.collection.clone()),
            })
    }

    async fn upsert_chunk(&self, chunk: &[String]) -> RagResult<usize> {
        let embeddings =
            futures::future::try_join_all(chunk.iter().map(|text| self.embedder.embed(text)))
                .await?;

        let mut points = Vec::with_capacity(chunk.len());
        for (text, vector) in chunk.iter().zip(embeddings) {
            if vector.len() != self.dimension {
                return Err(RagError::EmbeddingFailed(format!(
                    "vector length {} does not match collection dimension {}",
                    vector.len(),
                    self.dimension
                )));
            }
            let payload = Payload::try_from(serde_json::json!({ "text": text }))
                .map_err(|e| RagError::BackendUnavailable(format!("payload conversion: {e}")))?;
            points.push(PointStruct {
                id: Some(PointId::from(passage_id(text))),
                vectors: Some(Vectors::from(vector)),
                payload: payload.into(),
            });
        }

        let count = points.len();
        let builder = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);
        self.client
            .upsert_points(builder)
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("upsert failed: {e}")))?;
        log::info!(
            "Upserted {} passages into collection '{}'",
            count,
            self.collection
        );
        Ok(count)
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self) -> RagResult<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        log::info!("Checking if collection '{}' exists...", self.collection);
        match self.client.collection_info(&self.collection).await {
            Ok(_) => {
                log::info!("Collection '{}' already exists", self.collection);
            }
            Err(e) => {
                log::warn!(
                    "Collection '{}' not found ({}); creating...",
                    self.collection,
                    e
                );
                self.create_collection().await?;
                self.wait_until_ready().await?;
            }
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_texts(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> RagResult<usize> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(RagError::NotInitialized);
        }
        if texts.is_empty() {
            return Ok(0);
        }

        // Chunks are written sequentially; each one is an independent unit of
        // failure, so an error here leaves earlier chunks intact.
        let mut stored = 0;
        for chunk in texts.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            stored += self.upsert_chunk(chunk).await?;
        }
        Ok(stored)
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> RagResult<Vec<SimilarityMatch>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(RagError::NotInitialized);
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        if query_vector.len() != self.dimension {
            return Err(RagError::EmbeddingFailed(format!(
                "query vector length {} does not match collection dimension {}",
                query_vector.len(),
                self.dimension
            )));
        }

        let request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: query_vector,
            limit: k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(
                    qdrant_client::qdrant::with_payload_selector::SelectorOptions::Enable(true),
                ),
            }),
            with_vectors: Some(WithVectorsSelector {
                selector_options: Some(
                    qdrant_client::qdrant::with_vectors_selector::SelectorOptions::Enable(false),
                ),
            }),
            ..Default::default()
        };

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("search failed: {e}")))?;

        let mut matches: Vec<SimilarityMatch> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let text = point.payload.get("text").and_then(|value| {
                    match value.kind.as_ref() {
                        Some(QdrantValueKind::StringValue(s)) => Some(s.clone()),
                        _ => None,
                    }
                });
                match text {
                    Some(text) => Some(SimilarityMatch {
                        text,
                        score: point.score,
                    }),
                    None => {
                        log::warn!("Search hit {:?} has no text payload, skipping", point.id);
                        None
                    }
                }
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(k);
        Ok(matches)
    }
}
