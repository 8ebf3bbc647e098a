//! Qdrant vector index integration.

pub mod client;
pub mod types;

pub use client::QdrantService;
pub use types::{ChunkPayload, ChunkPoint, CollectionStats, QdrantError, ScoredPoint};
