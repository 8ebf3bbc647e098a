//! Answer pipeline: embed the query, retrieve relevant chunks, assemble a context window,
//! synthesize an answer, and attach cited sources.
//!
//! Degradation policy: embedding or language-model failures never fail the request — the
//! pipeline falls back to a fixed answer string. Only vector-index unavailability is
//! surfaced to the HTTP layer, which maps it to a server-error signal.

/// Language-model client adapters.
pub mod chat;

use crate::{
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, get_embedding_client},
    metrics::{DependencyHealth, ServiceMetrics},
    qdrant::{QdrantError, QdrantService, ScoredPoint},
};
use async_trait::async_trait;
use chat::{ChatClient, ChatPrompt, get_chat_client};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Fixed answer returned when no relevant documents were retrieved.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str = "I'm sorry, but I don't have enough context to \
     answer your question. Please make sure relevant documents have been uploaded and processed.";

/// Fixed answer returned when the embedding or language model fails.
pub const MODEL_FAILURE_ANSWER: &str = "I'm sorry, but I encountered an error while generating \
     the answer. Please try again later.";

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that answers questions based only \
     on the provided context. If the context is insufficient to answer, say so. Be concise and \
     accurate.";

/// Maximum characters of chunk text carried into a source preview.
const PREVIEW_CHARS: usize = 200;

/// Errors surfaced by the answer pipeline to its caller.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Vector index was unreachable or rejected the search.
    #[error("Vector index request failed: {0}")]
    Index(#[from] QdrantError),
}

/// A chunk retrieved for one query. Constructed per-query, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    /// Chunk text.
    pub content: String,
    /// Filename of the source document.
    pub filename: String,
    /// Blob store key of the source document.
    pub source_key: String,
    /// Position of the chunk within its document.
    pub chunk_id: usize,
    /// Similarity score reported by the index.
    pub score: f32,
}

/// A cited source attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    /// Filename of the source document.
    pub filename: String,
    /// Similarity score rounded to three decimals.
    pub score: f64,
    /// First [`PREVIEW_CHARS`] characters of the chunk, with an ellipsis when truncated.
    pub content_preview: String,
}

/// Completed answer with its cited sources.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Synthesized (or fallback) answer text.
    pub answer: String,
    /// Sources in retrieval rank order; empty when sources were not requested.
    pub sources: Vec<SourceRef>,
}

/// Coordinates retrieval-augmented answering over the vector index.
pub struct RagService {
    embedding: Box<dyn EmbeddingClient + Send + Sync>,
    chat: Box<dyn ChatClient + Send + Sync>,
    index: QdrantService,
    metrics: Arc<ServiceMetrics>,
    embedding_dimension: usize,
}

impl RagService {
    /// Assemble a service from explicitly constructed components.
    pub fn new(
        embedding: Box<dyn EmbeddingClient + Send + Sync>,
        chat: Box<dyn ChatClient + Send + Sync>,
        index: QdrantService,
        metrics: Arc<ServiceMetrics>,
        embedding_dimension: usize,
    ) -> Self {
        Self {
            embedding,
            chat,
            index,
            metrics,
            embedding_dimension,
        }
    }

    /// Build a service from the loaded configuration and ensure the collection exists.
    pub async fn connect(
        config: &Config,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, AnswerError> {
        let index = QdrantService::from_config(config)?;
        index.ensure_collection().await?;
        Ok(Self::new(
            get_embedding_client(config),
            get_chat_client(config),
            index,
            metrics,
            config.embedding_dimension,
        ))
    }

    /// Answer a query from the indexed corpus.
    ///
    /// Returns `Err` only when the vector index is unavailable; every model-side failure
    /// degrades to a fixed answer so the chat surface stays responsive.
    pub async fn answer(
        &self,
        query: &str,
        max_results: usize,
        include_sources: bool,
    ) -> Result<ChatOutcome, AnswerError> {
        let vector = match self.embed_query(query).await {
            Ok(vector) => vector,
            Err(error) => {
                tracing::error!(error = %error, "Query embedding failed");
                self.metrics.record_query();
                return Ok(ChatOutcome {
                    answer: MODEL_FAILURE_ANSWER.to_string(),
                    sources: Vec::new(),
                });
            }
        };

        let hits = self.index.search(vector, max_results).await?;
        let documents: Vec<RetrievedDocument> =
            hits.into_iter().filter_map(map_scored_point).collect();
        tracing::info!(count = documents.len(), "Retrieved documents");

        let answer = if documents.is_empty() {
            INSUFFICIENT_CONTEXT_ANSWER.to_string()
        } else {
            let context = assemble_context(&documents);
            match self.synthesize(query, &context).await {
                Ok(answer) => answer,
                Err(error) => {
                    tracing::error!(error = %error, "Answer synthesis failed");
                    MODEL_FAILURE_ANSWER.to_string()
                }
            }
        };

        let sources = if include_sources {
            documents.iter().map(source_ref).collect()
        } else {
            Vec::new()
        };

        self.metrics.record_query();
        Ok(ChatOutcome { answer, sources })
    }

    /// Probe reachability of the vector index for health reporting.
    pub async fn health_probe(&self) -> Result<(), QdrantError> {
        self.index.health_probe().await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let mut vectors = self.embedding.embed(vec![query.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            EmbeddingClientError::InvalidResponse("provider returned no vectors".to_string())
        })?;
        if vector.len() != self.embedding_dimension {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.embedding_dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    async fn synthesize(&self, query: &str, context: &str) -> Result<String, chat::ChatClientError> {
        let prompt = ChatPrompt {
            system: SYSTEM_INSTRUCTION.to_string(),
            user: format!(
                "Based on the following context, please answer the question.\n\n\
                 Context:\n{context}\n\nQuestion: {query}\n\nAnswer:"
            ),
        };

        let mut stream = self.chat.generate_stream(prompt);
        let mut parts = Vec::new();
        while let Some(fragment) = stream.next().await {
            parts.push(fragment?);
        }
        Ok(parts.concat())
    }
}

/// Abstraction over the answer pipeline used by the HTTP surface.
#[async_trait]
pub trait AnswerApi: Send + Sync {
    /// Answer a query from the indexed corpus.
    async fn answer(
        &self,
        query: &str,
        max_results: usize,
        include_sources: bool,
    ) -> Result<ChatOutcome, AnswerError>;

    /// Reachability snapshot of the vector index.
    async fn index_health(&self) -> DependencyHealth;
}

#[async_trait]
impl AnswerApi for RagService {
    async fn answer(
        &self,
        query: &str,
        max_results: usize,
        include_sources: bool,
    ) -> Result<ChatOutcome, AnswerError> {
        RagService::answer(self, query, max_results, include_sources).await
    }

    async fn index_health(&self) -> DependencyHealth {
        match self.health_probe().await {
            Ok(()) => DependencyHealth::reachable(),
            Err(error) => {
                tracing::warn!(error = %error, "Vector index health probe failed");
                DependencyHealth::unreachable(error)
            }
        }
    }
}

/// Concatenate retrieved chunk texts in rank order, each annotated with its source
/// filename and score, separated by blank lines.
fn assemble_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|doc| {
            format!(
                "[{} (score {:.3})]\n{}",
                doc.filename, doc.score, doc.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn map_scored_point(point: ScoredPoint) -> Option<RetrievedDocument> {
    let ScoredPoint { id, score, payload } = point;
    let Some(mut payload) = payload else {
        tracing::warn!(id = %id, "Search hit carried no payload");
        return None;
    };

    let content = match payload.remove("content") {
        Some(serde_json::Value::String(value)) => value,
        _ => {
            tracing::warn!(id = %id, "Search hit payload carried no content");
            return None;
        }
    };
    let filename = match payload.remove("filename") {
        Some(serde_json::Value::String(value)) => value,
        _ => "Unknown".to_string(),
    };
    let source_key = match payload.remove("source_key") {
        Some(serde_json::Value::String(value)) => value,
        _ => String::new(),
    };
    let chunk_id = payload
        .remove("chunk_id")
        .and_then(|value| value.as_u64())
        .unwrap_or(0) as usize;

    Some(RetrievedDocument {
        content,
        filename,
        source_key,
        chunk_id,
        score,
    })
}

fn source_ref(document: &RetrievedDocument) -> SourceRef {
    SourceRef {
        filename: document.filename.clone(),
        score: round3(document.score),
        content_preview: truncate_preview(&document.content),
    }
}

fn round3(score: f32) -> f64 {
    (f64::from(score) * 1000.0).round() / 1000.0
}

fn truncate_preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
        preview.push_str("...");
        preview
    } else {
        content.to_string()
    }
}
