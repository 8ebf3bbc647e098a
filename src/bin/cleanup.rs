//! Operator cleanup: remove every indexed chunk for one source key.
//!
//! Re-ingestion of a blob key is otherwise a no-op (the worker skips source keys that are
//! already indexed), so deleting the old chunks is the way to force a document through the
//! pipeline again.

use ragpipe::{config, logging, qdrant::QdrantService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();

    let source_key = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: ragpipe-cleanup <source-key>"))?;

    let index = QdrantService::from_config(config::get_config())?;
    let before = index.collection_stats().await?;
    index.delete_by_filter("source_key", &source_key).await?;
    let after = index.collection_stats().await?;

    tracing::info!(
        source_key = %source_key,
        removed = before.points_count.saturating_sub(after.points_count),
        remaining = after.points_count,
        "Cleanup complete"
    );
    Ok(())
}
