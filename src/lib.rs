#![deny(missing_docs)]

//! Core library for the Ragpipe document Q&A service.
//!
//! Two processes share this crate: the API server (`ragpipe`) accepts uploads and answers
//! chat queries; the worker (`ragpipe-worker`) drains the ingestion queue and indexes
//! documents into the vector store. They coordinate only through the blob store, the
//! queue, and the vector index.

/// Answer pipeline and language-model adapters.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// AWS SigV4 request signing.
pub mod aws;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// File-format text extraction.
pub mod extract;
/// Upload validation, blob storage, and task enqueueing.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Service counters and dependency health snapshots.
pub mod metrics;
/// Worker-side document processing pipeline.
pub mod processing;
/// Qdrant vector index integration.
pub mod qdrant;
/// Work queue adapter.
pub mod queue;
/// Blob store client.
pub mod storage;
/// Queue polling worker loop.
pub mod worker;
