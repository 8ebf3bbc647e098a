use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
///
/// Each process keeps its own instance: the API server counts accepted uploads and
/// answered queries, the worker counts processed documents and indexed chunks.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_accepted: AtomicU64,
    documents_processed: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_answered: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload that passed validation and was enqueued.
    pub fn record_accepted(&self) {
        self.documents_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processed document and the number of chunks produced for it.
    pub fn record_processed(&self, chunk_count: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered chat query.
    pub fn record_query(&self) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_accepted: self.documents_accepted.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Uploads accepted and enqueued since startup.
    pub documents_accepted: u64,
    /// Documents fully processed by the worker since startup.
    pub documents_processed: u64,
    /// Total chunk count upserted across all processed documents.
    pub chunks_indexed: u64,
    /// Chat queries answered since startup.
    pub queries_answered: u64,
}

/// Reachability snapshot for a single external dependency.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DependencyHealth {
    /// Indicates whether the dependency responded successfully.
    pub reachable: bool,
    /// Optional diagnostic string captured when the dependency is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    /// Snapshot for a dependency that answered its probe.
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            error: None,
        }
    }

    /// Snapshot for a dependency whose probe failed.
    pub fn unreachable(error: impl std::fmt::Display) -> Self {
        Self {
            reachable: false,
            error: Some(error.to_string()),
        }
    }
}
