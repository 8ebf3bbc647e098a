//! SQS-compatible work queue adapter.
//!
//! Speaks the SQS JSON protocol (`X-Amz-Target` + `application/x-amz-json-1.0`) over plain
//! HTTP with SigV4 signing. Delivery semantics are at-least-once: a received task stays
//! invisible for the queue's visibility timeout and becomes redeliverable unless it is
//! acknowledged. That redelivery window is the only retry mechanism for ingestion failures.

use crate::aws::{self, AwsCredentials, SigningError};
use crate::config::Config;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Long-poll wait applied to every receive call, in seconds.
const RECEIVE_WAIT_SECS: u64 = 20;
/// How long undelivered tasks are retained when the queue is created, in seconds.
const MESSAGE_RETENTION_SECS: u64 = 86_400;

/// Errors returned while interacting with the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Request signing failed before anything was sent.
    #[error("Failed to sign queue request: {0}")]
    Signing(#[from] SigningError),
    /// HTTP layer failed before receiving a response.
    #[error("Queue request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Task body could not be serialized or a response could not be decoded.
    #[error("Queue payload error: {0}")]
    Payload(#[from] serde_json::Error),
    /// Queue responded with an unexpected status code.
    #[error("Unexpected queue response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the queue.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// A queued unit of ingestion work, serialized as the message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    /// Identifier assigned to the document at upload time.
    pub document_id: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Key of the stored blob in the blob store.
    pub blob_key: String,
    /// Declared content type of the upload.
    pub content_type: String,
    /// Upload size in bytes.
    pub byte_size: u64,
    /// Lifecycle marker carried for observability (`pending` at enqueue time).
    pub status: String,
}

/// A delivered task together with the receipt handle proving ownership of the delivery.
#[derive(Debug, Clone)]
pub struct ReceivedTask {
    /// The deserialized task body.
    pub task: IngestionTask,
    /// Opaque token required to acknowledge (delete) this delivery.
    pub receipt_handle: String,
}

/// HTTP client for queue operations.
pub struct SqsService {
    client: Client,
    base_url: String,
    queue_name: String,
    region: String,
    visibility_timeout_secs: u64,
    credentials: AwsCredentials,
    queue_url: OnceCell<String>,
}

impl SqsService {
    /// Construct a client for the given endpoint, queue, and credentials.
    pub fn new(
        endpoint_url: Option<String>,
        queue_name: String,
        region: String,
        visibility_timeout_secs: u64,
        credentials: AwsCredentials,
    ) -> Result<Self, QueueError> {
        let client = Client::builder().user_agent("ragpipe/0.1").build()?;
        let base_url = endpoint_url
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://sqs.{region}.amazonaws.com"));
        tracing::debug!(endpoint = %base_url, queue = %queue_name, "Initialized queue client");

        Ok(Self {
            client,
            base_url,
            queue_name,
            region,
            visibility_timeout_secs,
            credentials,
            queue_url: OnceCell::new(),
        })
    }

    /// Construct a client from the loaded configuration, reading credentials from the
    /// environment.
    pub fn from_config(config: &Config, credentials: AwsCredentials) -> Result<Self, QueueError> {
        Self::new(
            config.sqs_endpoint_url.clone(),
            config.sqs_queue_name.clone(),
            config.aws_region.clone(),
            config.queue_visibility_timeout_secs,
            credentials,
        )
    }

    /// Resolve the queue URL, creating the queue when it does not exist yet.
    pub async fn ensure_queue(&self) -> Result<&str, QueueError> {
        let url = self
            .queue_url
            .get_or_try_init(|| async {
                match self.call("GetQueueUrl", json!({ "QueueName": self.queue_name })).await {
                    Ok(body) => Ok(queue_url_from(&body)),
                    Err(QueueError::UnexpectedStatus { status: _, body })
                        if body.contains("NonExistentQueue") || body.contains("QueueDoesNotExist") =>
                    {
                        tracing::debug!(queue = %self.queue_name, "Creating queue");
                        let created = self
                            .call(
                                "CreateQueue",
                                json!({
                                    "QueueName": self.queue_name,
                                    "Attributes": {
                                        "VisibilityTimeout": self.visibility_timeout_secs.to_string(),
                                        "MessageRetentionPeriod": MESSAGE_RETENTION_SECS.to_string(),
                                        "ReceiveMessageWaitTimeSeconds": RECEIVE_WAIT_SECS.to_string(),
                                    }
                                }),
                            )
                            .await?;
                        Ok(queue_url_from(&created))
                    }
                    Err(error) => Err(error),
                }
            })
            .await?;
        Ok(url.as_str())
    }

    /// Enqueue an ingestion task.
    pub async fn enqueue(&self, task: &IngestionTask) -> Result<(), QueueError> {
        let queue_url = self.ensure_queue().await?.to_string();
        let body = serde_json::to_string(task)?;
        let response = self
            .call(
                "SendMessage",
                json!({ "QueueUrl": queue_url, "MessageBody": body }),
            )
            .await?;
        tracing::debug!(
            document_id = %task.document_id,
            message_id = response.get("MessageId").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Task enqueued"
        );
        Ok(())
    }

    /// Receive up to `max_items` tasks, long-polling for [`RECEIVE_WAIT_SECS`].
    ///
    /// Returns an empty vector when the poll times out. Message bodies that fail to parse
    /// are skipped (and logged); their deliveries stay unacknowledged and will redeliver
    /// until an operator intervenes.
    pub async fn receive(&self, max_items: usize) -> Result<Vec<ReceivedTask>, QueueError> {
        let queue_url = self.ensure_queue().await?.to_string();
        let response = self
            .call(
                "ReceiveMessage",
                json!({
                    "QueueUrl": queue_url,
                    "MaxNumberOfMessages": max_items,
                    "WaitTimeSeconds": RECEIVE_WAIT_SECS,
                }),
            )
            .await?;

        let messages = response
            .get("Messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut received = Vec::with_capacity(messages.len());
        for message in messages {
            let Some(receipt_handle) = message
                .get("ReceiptHandle")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let body = message.get("Body").and_then(Value::as_str).unwrap_or("");
            match serde_json::from_str::<IngestionTask>(body) {
                Ok(task) => received.push(ReceivedTask {
                    task,
                    receipt_handle,
                }),
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping malformed task body");
                }
            }
        }
        tracing::debug!(count = received.len(), "Received tasks");
        Ok(received)
    }

    /// Acknowledge a delivery, permanently removing it from the queue.
    pub async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let queue_url = self.ensure_queue().await?.to_string();
        self.call(
            "DeleteMessage",
            json!({ "QueueUrl": queue_url, "ReceiptHandle": receipt_handle }),
        )
        .await?;
        tracing::debug!("Task acknowledged");
        Ok(())
    }

    /// Probe reachability of the queue for health reporting.
    pub async fn health_probe(&self) -> Result<(), QueueError> {
        self.ensure_queue().await.map(|_| ())
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value, QueueError> {
        let payload = serde_json::to_vec(&body)?;
        let prepared = aws::sign_request(
            "POST",
            &self.base_url,
            "/",
            &[],
            &[
                ("x-amz-target", format!("AmazonSQS.{action}")),
                (
                    "content-type",
                    "application/x-amz-json-1.0".to_string(),
                ),
            ],
            &payload,
            &self.credentials,
            &self.region,
            "sqs",
        )?;

        let mut request = self.client.post(&prepared.url).body(payload);
        for (name, value) in &prepared.headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::UnexpectedStatus { status, body });
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn queue_url_from(body: &Value) -> String {
    body.get("QueueUrl")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
