//! Upload-side ingestion: validation, blob storage, and task enqueueing.
//!
//! The request path does no processing work. A valid upload is stored in the blob store,
//! referenced by exactly one queued task, and the handler returns immediately; the worker
//! picks the task up asynchronously. Validation happens before any network call, so a
//! rejected upload leaves nothing behind.

use crate::aws::AwsCredentials;
use crate::config::Config;
use crate::extract::{self, DocumentFormat};
use crate::metrics::{DependencyHealth, ServiceMetrics};
use crate::queue::{IngestionTask, QueueError, SqsService};
use crate::storage::{S3StorageService, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Hard cap on upload size: 10 MiB.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Validation failures reported to the uploader.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Upload carried no filename.
    #[error("No filename provided")]
    MissingFilename,
    /// File extension is not in the allow-list.
    #[error("Invalid file type '{0}'. Allowed types: .pdf, .txt, .md, .docx, .doc")]
    UnsupportedExtension(String),
    /// Upload exceeds the size cap.
    #[error("File too large ({0} bytes). Maximum size is 10MB")]
    PayloadTooLarge(usize),
}

/// Errors raised while accepting an upload.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Upload was rejected before anything was stored.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// Blob store rejected the upload.
    #[error("Failed to store document: {0}")]
    Storage(#[from] StorageError),
    /// Queue rejected the ingestion task. The stored blob is orphaned but never
    /// referenced; it is reclaimed out-of-band.
    #[error("Failed to enqueue document: {0}")]
    Queue(#[from] QueueError),
}

/// An uploaded file as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    /// Original filename as uploaded.
    pub filename: String,
    /// Declared content type of the upload.
    pub content_type: String,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
}

/// Identifiers assigned to an accepted upload.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// Identifier assigned to the document.
    pub document_id: String,
    /// Blob store key the document was stored under.
    pub blob_key: String,
}

/// Validate an upload against the extension allow-list and size cap.
pub fn validate_upload(filename: &str, byte_size: usize) -> Result<(), ValidationError> {
    if filename.trim().is_empty() {
        return Err(ValidationError::MissingFilename);
    }
    let extension = extract::file_extension(filename)
        .ok_or_else(|| ValidationError::UnsupportedExtension(filename.to_string()))?;
    if DocumentFormat::from_extension(&extension).is_none() {
        return Err(ValidationError::UnsupportedExtension(format!(".{extension}")));
    }
    if byte_size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::PayloadTooLarge(byte_size));
    }
    Ok(())
}

/// Abstraction over upload-side ingestion used by the HTTP surface.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Validate an upload, store its blob, and enqueue an ingestion task.
    async fn ingest_document(&self, upload: DocumentUpload) -> Result<IngestReceipt, IngestError>;

    /// Reachability snapshot of the blob store.
    async fn storage_health(&self) -> DependencyHealth;

    /// Reachability snapshot of the work queue.
    async fn queue_health(&self) -> DependencyHealth;
}

/// Accepts uploads on behalf of the HTTP layer.
pub struct IngestService {
    storage: S3StorageService,
    queue: SqsService,
    metrics: Arc<ServiceMetrics>,
}

impl IngestService {
    /// Assemble a service from explicitly constructed components.
    pub fn new(storage: S3StorageService, queue: SqsService, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            storage,
            queue,
            metrics,
        }
    }

    /// Build a service from the loaded configuration and provision the bucket and queue.
    pub async fn connect(
        config: &Config,
        credentials: AwsCredentials,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, IngestError> {
        let storage = S3StorageService::from_config(config, credentials.clone())?;
        let queue = SqsService::from_config(config, credentials)?;
        storage.ensure_bucket().await?;
        queue.ensure_queue().await?;
        Ok(Self::new(storage, queue, metrics))
    }

    /// Validate an upload, store its blob, and enqueue an ingestion task.
    ///
    /// Success means both the blob store and the queue accepted the work. If queueing
    /// fails after the blob was stored, the orphaned blob is left unreferenced.
    pub async fn ingest_document(
        &self,
        upload: DocumentUpload,
    ) -> Result<IngestReceipt, IngestError> {
        let DocumentUpload {
            filename,
            content_type,
            bytes,
        } = upload;
        let byte_size = bytes.len();
        validate_upload(&filename, byte_size)?;

        let document_id = Uuid::new_v4().to_string();
        let blob_key = S3StorageService::object_key_for(&filename);

        self.storage.put_object(&blob_key, bytes, &content_type).await?;

        let task = IngestionTask {
            document_id: document_id.clone(),
            filename: filename.clone(),
            blob_key: blob_key.clone(),
            content_type,
            byte_size: byte_size as u64,
            status: "pending".to_string(),
        };
        self.queue.enqueue(&task).await?;

        self.metrics.record_accepted();
        tracing::info!(
            document_id = %document_id,
            filename = %filename,
            blob_key = %blob_key,
            byte_size,
            "Document ingested"
        );
        Ok(IngestReceipt {
            document_id,
            blob_key,
        })
    }
}

#[async_trait]
impl IngestApi for IngestService {
    async fn ingest_document(&self, upload: DocumentUpload) -> Result<IngestReceipt, IngestError> {
        IngestService::ingest_document(self, upload).await
    }

    async fn storage_health(&self) -> DependencyHealth {
        match self.storage.health_probe().await {
            Ok(()) => DependencyHealth::reachable(),
            Err(error) => {
                tracing::warn!(error = %error, "Blob store health probe failed");
                DependencyHealth::unreachable(error)
            }
        }
    }

    async fn queue_health(&self) -> DependencyHealth {
        match self.queue.health_probe().await {
            Ok(()) => DependencyHealth::reachable(),
            Err(error) => {
                tracing::warn!(error = %error, "Queue health probe failed");
                DependencyHealth::unreachable(error)
            }
        }
    }
}
