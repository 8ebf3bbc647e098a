//! Processing service coordinating extraction, chunking, embedding, and index writes.

use crate::{
    aws::AwsCredentials,
    config::Config,
    embedding::{EmbeddingClient, get_embedding_client},
    extract::{self, DocumentFormat},
    metrics::ServiceMetrics,
    processing::{
        chunking::split_text,
        types::{ProcessingError, ProcessingOutcome},
    },
    qdrant::{ChunkPayload, ChunkPoint, QdrantService},
    queue::IngestionTask,
    storage::S3StorageService,
};
use std::io::Write;
use std::sync::Arc;

/// Runs the worker side of the ingestion pipeline for one task at a time.
///
/// The service owns long-lived handles to the blob store, the vector index, and the
/// embedding client. Construct it once near worker start; every failure bubbles out of
/// [`ProcessingService::process_task`] so the caller decides whether the delivery is
/// acknowledged.
pub struct ProcessingService {
    storage: S3StorageService,
    index: QdrantService,
    embedding: Box<dyn EmbeddingClient + Send + Sync>,
    metrics: Arc<ServiceMetrics>,
    chunk_size: usize,
    chunk_overlap: usize,
    embedding_dimension: usize,
}

impl ProcessingService {
    /// Assemble a service from explicitly constructed components.
    pub fn new(
        storage: S3StorageService,
        index: QdrantService,
        embedding: Box<dyn EmbeddingClient + Send + Sync>,
        metrics: Arc<ServiceMetrics>,
        chunk_size: usize,
        chunk_overlap: usize,
        embedding_dimension: usize,
    ) -> Self {
        Self {
            storage,
            index,
            embedding,
            metrics,
            chunk_size,
            chunk_overlap,
            embedding_dimension,
        }
    }

    /// Build a service from the loaded configuration and ensure the collection exists.
    pub async fn connect(
        config: &Config,
        credentials: AwsCredentials,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ProcessingError> {
        let storage = S3StorageService::from_config(config, credentials)?;
        let index = QdrantService::from_config(config)?;
        index.ensure_collection().await?;
        tracing::debug!(collection = %config.qdrant_collection_name, "Collection ready");

        Ok(Self::new(
            storage,
            index,
            get_embedding_client(config),
            metrics,
            config.chunk_size,
            config.chunk_overlap,
            config.embedding_dimension,
        ))
    }

    /// Run the full pipeline for one delivered task: download, extract, chunk, embed,
    /// dedup-check, and upsert.
    pub async fn process_task(
        &self,
        task: &IngestionTask,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        tracing::info!(
            document_id = %task.document_id,
            filename = %task.filename,
            blob_key = %task.blob_key,
            "Processing document"
        );

        let format = DocumentFormat::from_filename(&task.filename)?;
        let bytes = self.storage.get_object(&task.blob_key).await?;

        // Local materialization is scoped to this block; the spool file is removed on drop
        // on every path out of it.
        let segments = {
            let mut spool = tempfile::NamedTempFile::new()?;
            spool.write_all(&bytes)?;
            extract::extract_file(spool.path(), format)?
        };
        let text = segments.join("\n\n");

        let chunks = split_text(&text, self.chunk_size, self.chunk_overlap)?;
        if chunks.is_empty() {
            tracing::warn!(document_id = %task.document_id, "Document produced no chunks");
            return Ok(ProcessingOutcome {
                chunk_count: 0,
                skipped_duplicate: false,
            });
        }

        let embeddings = self.embedding.embed(chunks.clone()).await?;
        if embeddings.len() != chunks.len() {
            return Err(ProcessingError::EmbeddingCount {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }
        for vector in &embeddings {
            if vector.len() != self.embedding_dimension {
                return Err(crate::qdrant::QdrantError::DimensionMismatch {
                    expected: self.embedding_dimension,
                    actual: vector.len(),
                }
                .into());
            }
        }

        // Document-level dedup: if any chunk for this source key is already stored, the
        // whole batch is skipped and the task counts as successfully processed.
        if self.index.exists_by_filter("source_key", &task.blob_key).await? {
            tracing::warn!(
                source_key = %task.blob_key,
                "Document already indexed, skipping upsert"
            );
            return Ok(ProcessingOutcome {
                chunk_count: 0,
                skipped_duplicate: true,
            });
        }

        let points: Vec<ChunkPoint> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_id, (content, vector))| {
                ChunkPoint::new(
                    vector,
                    ChunkPayload {
                        content,
                        filename: task.filename.clone(),
                        source_key: task.blob_key.clone(),
                        chunk_id,
                        chunk_size: self.chunk_size,
                    },
                )
            })
            .collect();

        let chunk_count = self.index.upsert_points(points).await?;
        self.metrics.record_processed(chunk_count as u64);
        tracing::info!(
            document_id = %task.document_id,
            chunks = chunk_count,
            "Document indexed"
        );

        Ok(ProcessingOutcome {
            chunk_count,
            skipped_duplicate: false,
        })
    }
}
