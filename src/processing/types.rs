//! Core data types and error definitions for the processing pipeline.

use crate::{
    embedding::EmbeddingClientError, extract::ExtractError, qdrant::QdrantError,
    queue::QueueError, storage::StorageError,
};
use thiserror::Error;

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size of zero makes no progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for at least one new character per window.
    #[error("chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Configured chunk size.
        chunk_size: usize,
        /// Configured overlap.
        chunk_overlap: usize,
    },
}

/// Errors emitted by the document processing pipeline.
///
/// Any of these leaves the task unacknowledged, so the delivery becomes visible again after
/// the queue's visibility timeout.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Blob download failed.
    #[error("Failed to fetch document blob: {0}")]
    Storage(#[from] StorageError),
    /// Local spool file could not be written or read.
    #[error("Failed to materialize document locally: {0}")]
    Spool(#[from] std::io::Error),
    /// Text extraction rejected the document.
    #[error("Failed to extract document text: {0}")]
    Extraction(#[from] ExtractError),
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider returned a different number of vectors than requested.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCount {
        /// Number of chunks submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Vector index interaction failed.
    #[error("Vector index request failed: {0}")]
    Index(#[from] QdrantError),
    /// Queue interaction failed while setting up the worker.
    #[error("Queue request failed: {0}")]
    Queue(#[from] QueueError),
}

/// Summary of a completed processing run for one document.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingOutcome {
    /// Number of chunks upserted into the index.
    pub chunk_count: usize,
    /// Whether the document was skipped because its source key is already indexed.
    pub skipped_duplicate: bool,
}
