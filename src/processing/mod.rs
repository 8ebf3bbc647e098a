//! Worker-side document processing pipeline.

/// Sliding-window text chunking.
pub mod chunking;
/// Pipeline orchestration over the blob store, embedding client, and vector index.
pub mod service;
/// Shared pipeline types and errors.
pub mod types;

pub use chunking::split_text;
pub use service::ProcessingService;
pub use types::{ChunkingError, ProcessingError, ProcessingOutcome};
