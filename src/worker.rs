//! Queue polling worker loop.
//!
//! Each worker instance is a single-threaded poll loop; run more instances for throughput.
//! Coordination between instances happens only through the queue's visibility timeout: a
//! delivered task stays hidden until it is acknowledged or the timeout lapses. A task is
//! acknowledged only after processing succeeds, so every failure path ends in redelivery.

use crate::{
    aws::AwsCredentials,
    config::Config,
    metrics::ServiceMetrics,
    processing::{ProcessingError, ProcessingService},
    queue::{QueueError, ReceivedTask, SqsService},
};
use std::sync::Arc;
use std::time::Duration;

/// Maximum deliveries pulled per poll.
const MAX_BATCH: usize = 10;

/// Polls the queue and drives the processing pipeline for each delivered task.
pub struct DocumentWorker {
    queue: SqsService,
    processing: ProcessingService,
    poll_interval: Duration,
}

impl DocumentWorker {
    /// Assemble a worker from explicitly constructed components.
    pub fn new(queue: SqsService, processing: ProcessingService, poll_interval: Duration) -> Self {
        Self {
            queue,
            processing,
            poll_interval,
        }
    }

    /// Build a worker from the loaded configuration, provisioning the queue and collection.
    pub async fn connect(config: &Config) -> Result<Self, ProcessingError> {
        let credentials =
            AwsCredentials::from_env().map_err(|error| ProcessingError::Queue(error.into()))?;
        let queue = SqsService::from_config(config, credentials.clone())?;
        queue.ensure_queue().await?;
        let metrics = Arc::new(ServiceMetrics::new());
        let processing = ProcessingService::connect(config, credentials, metrics).await?;
        Ok(Self::new(
            queue,
            processing,
            Duration::from_secs(config.worker_poll_interval_secs),
        ))
    }

    /// Run the poll loop until the process is terminated.
    pub async fn run(&self) {
        tracing::info!("Worker started");
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "Batch handled"),
                Err(error) => {
                    tracing::error!(error = %error, "Failed to receive tasks");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Receive and handle one batch of deliveries. Returns how many were handled.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let deliveries = self.queue.receive(MAX_BATCH).await?;
        let count = deliveries.len();
        for delivery in deliveries {
            self.handle(delivery).await;
        }
        Ok(count)
    }

    async fn handle(&self, delivery: ReceivedTask) {
        let ReceivedTask {
            task,
            receipt_handle,
        } = delivery;

        match self.processing.process_task(&task).await {
            Ok(outcome) => match self.queue.acknowledge(&receipt_handle).await {
                Ok(()) => tracing::info!(
                    document_id = %task.document_id,
                    chunks = outcome.chunk_count,
                    skipped_duplicate = outcome.skipped_duplicate,
                    "Task acknowledged"
                ),
                Err(error) => {
                    // The redelivered task will hit the dedup probe and ack cleanly.
                    tracing::warn!(
                        document_id = %task.document_id,
                        error = %error,
                        "Failed to acknowledge processed task"
                    );
                }
            },
            Err(error) => {
                tracing::error!(
                    document_id = %task.document_id,
                    filename = %task.filename,
                    error = %error,
                    "Processing failed; task left for redelivery"
                );
            }
        }
    }
}
