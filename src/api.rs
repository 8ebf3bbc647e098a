//! HTTP surface for Ragpipe.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /api/v1/ingest` – Accept a multipart file upload, store the blob, and enqueue an
//!   ingestion task. Returns 204 No Content; processing happens asynchronously.
//! - `POST /api/v1/chat` – Answer a question over the indexed corpus, returning the answer,
//!   cited sources, and the processing time.
//! - `GET /health` – Liveness probe.
//! - `GET /api/v1/health/detailed` – Per-component reachability (blob store, queue, vector
//!   index) plus an overall rollup.
//! - `GET /api/v1/metrics` – Process-local ingestion and query counters.
//!
//! Handlers are generic over the [`IngestApi`] and [`AnswerApi`] seams so tests can run the
//! router against stubs.

use crate::answer::AnswerApi;
use crate::ingest::{DocumentUpload, IngestApi, IngestError, MAX_UPLOAD_BYTES, ValidationError};
use crate::metrics::{DependencyHealth, MetricsSnapshot, ServiceMetrics};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Headroom above the upload cap so the handler, not the body limit, produces the
/// size-rejection message for slightly oversized files.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 64 * 1024;

/// Shared state handed to every handler.
pub struct AppState<I, A> {
    /// Upload-side ingestion service.
    pub ingest: Arc<I>,
    /// Query-side answer service.
    pub answer: Arc<A>,
    /// Process-local counters.
    pub metrics: Arc<ServiceMetrics>,
}

impl<I, A> Clone for AppState<I, A> {
    fn clone(&self) -> Self {
        Self {
            ingest: self.ingest.clone(),
            answer: self.answer.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Build the HTTP router exposing the ingestion and chat API surface.
pub fn create_router<I, A>(
    ingest: Arc<I>,
    answer: Arc<A>,
    metrics: Arc<ServiceMetrics>,
) -> Router
where
    I: IngestApi + 'static,
    A: AnswerApi + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ingest", post(ingest_document::<I, A>))
        .route("/api/v1/chat", post(chat::<I, A>))
        .route("/api/v1/health/detailed", get(detailed_health::<I, A>))
        .route("/api/v1/metrics", get(get_metrics::<I, A>))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(AppState {
            ingest,
            answer,
            metrics,
        })
}

/// Accept a single-file multipart upload and hand it to the ingestion service.
async fn ingest_document<I, A>(
    State(state): State<AppState<I, A>>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError>
where
    I: IngestApi,
    A: AnswerApi,
{
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(format!("Malformed multipart body: {err}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::Validation(format!("Failed to read upload: {err}")))?;
            upload = Some(DocumentUpload {
                filename,
                content_type,
                bytes: bytes.to_vec(),
            });
            break;
        }
    }
    let Some(upload) = upload else {
        return Err(ApiError::Validation("No file provided".to_string()));
    };

    let receipt = state
        .ingest
        .ingest_document(upload)
        .await
        .map_err(map_ingest_error)?;
    tracing::info!(document_id = %receipt.document_id, "Upload accepted");
    Ok(StatusCode::NO_CONTENT)
}

fn map_ingest_error(error: IngestError) -> ApiError {
    match error {
        IngestError::Validation(validation @ ValidationError::PayloadTooLarge(_)) => {
            ApiError::PayloadTooLarge(validation.to_string())
        }
        IngestError::Validation(validation) => ApiError::Validation(validation.to_string()),
        IngestError::Storage(error) => {
            tracing::error!(error = %error, "Blob store rejected upload");
            ApiError::Dependency("Failed to upload file to storage".to_string())
        }
        IngestError::Queue(error) => {
            tracing::error!(error = %error, "Queue rejected ingestion task");
            ApiError::Dependency(
                "Failed to queue document for processing. Please try again later.".to_string(),
            )
        }
    }
}

/// Request body for the `POST /api/v1/chat` endpoint.
#[derive(Deserialize)]
struct ChatRequest {
    /// User question about the uploaded documents.
    query: String,
    /// Maximum number of relevant chunks to retrieve (1–20).
    #[serde(default = "default_max_results")]
    max_results: usize,
    /// Whether to attach source previews to the response.
    #[serde(default = "default_include_sources")]
    include_sources: bool,
}

const fn default_max_results() -> usize {
    5
}

const fn default_include_sources() -> bool {
    true
}

/// Response body for the `POST /api/v1/chat` endpoint.
#[derive(Serialize)]
struct ChatResponse {
    query: String,
    answer: String,
    sources: Vec<crate::answer::SourceRef>,
    processing_time: f64,
}

/// Answer a question over the indexed corpus.
async fn chat<I, A>(
    State(state): State<AppState<I, A>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError>
where
    I: IngestApi,
    A: AnswerApi,
{
    if request.query.trim().is_empty() {
        return Err(ApiError::Validation("Query must not be empty".to_string()));
    }
    if !(1..=20).contains(&request.max_results) {
        return Err(ApiError::Validation(
            "max_results must be between 1 and 20".to_string(),
        ));
    }

    let started = Instant::now();
    let outcome = state
        .answer
        .answer(&request.query, request.max_results, request.include_sources)
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Chat pipeline failed");
            ApiError::Dependency("Search backend unavailable. Please try again later.".to_string())
        })?;
    let processing_time = (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    tracing::info!(
        query = %request.query,
        sources = outcome.sources.len(),
        processing_time,
        "Chat request completed"
    );
    Ok(Json(ChatResponse {
        query: request.query,
        answer: outcome.answer,
        sources: outcome.sources,
        processing_time,
    }))
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "ragpipe" }))
}

/// Response body for `GET /api/v1/health/detailed`.
#[derive(Serialize)]
struct DetailedHealthResponse {
    status: &'static str,
    components: HealthComponents,
}

#[derive(Serialize)]
struct HealthComponents {
    blob_store: DependencyHealth,
    queue: DependencyHealth,
    vector_index: DependencyHealth,
}

/// Report per-component reachability plus an overall rollup.
async fn detailed_health<I, A>(
    State(state): State<AppState<I, A>>,
) -> Json<DetailedHealthResponse>
where
    I: IngestApi,
    A: AnswerApi,
{
    let blob_store = state.ingest.storage_health().await;
    let queue = state.ingest.queue_health().await;
    let vector_index = state.answer.index_health().await;
    let healthy = blob_store.reachable && queue.reachable && vector_index.reachable;

    Json(DetailedHealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        components: HealthComponents {
            blob_store,
            queue,
            vector_index,
        },
    })
}

/// Return a concise metrics snapshot for observability dashboards.
async fn get_metrics<I, A>(State(state): State<AppState<I, A>>) -> Json<MetricsSnapshot>
where
    I: IngestApi,
    A: AnswerApi,
{
    Json(state.metrics.snapshot())
}

enum ApiError {
    Validation(String),
    PayloadTooLarge(String),
    Dependency(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::PayloadTooLarge(detail) => (StatusCode::PAYLOAD_TOO_LARGE, detail),
            ApiError::Dependency(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::{AnswerError, ChatOutcome, SourceRef};
    use crate::ingest::{IngestReceipt, validate_upload};
    use crate::qdrant::QdrantError;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    struct StubIngest {
        uploads: Mutex<Vec<DocumentUpload>>,
        validate: bool,
        fail_queue: bool,
    }

    impl StubIngest {
        fn accepting() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                validate: true,
                fail_queue: false,
            }
        }
    }

    #[async_trait]
    impl IngestApi for StubIngest {
        async fn ingest_document(
            &self,
            upload: DocumentUpload,
        ) -> Result<IngestReceipt, IngestError> {
            if self.validate {
                validate_upload(&upload.filename, upload.bytes.len())?;
            }
            if self.fail_queue {
                return Err(IngestError::Queue(crate::queue::QueueError::UnexpectedStatus {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "queue down".into(),
                }));
            }
            let receipt = IngestReceipt {
                document_id: "doc-1".into(),
                blob_key: format!("uploads/20250101_000000_{}", upload.filename),
            };
            self.uploads.lock().await.push(upload);
            Ok(receipt)
        }

        async fn storage_health(&self) -> DependencyHealth {
            DependencyHealth::reachable()
        }

        async fn queue_health(&self) -> DependencyHealth {
            if self.fail_queue {
                DependencyHealth::unreachable("queue down")
            } else {
                DependencyHealth::reachable()
            }
        }
    }

    struct StubAnswer {
        outcome: Option<ChatOutcome>,
    }

    #[async_trait]
    impl AnswerApi for StubAnswer {
        async fn answer(
            &self,
            _query: &str,
            _max_results: usize,
            include_sources: bool,
        ) -> Result<ChatOutcome, AnswerError> {
            match &self.outcome {
                Some(outcome) => Ok(ChatOutcome {
                    answer: outcome.answer.clone(),
                    sources: if include_sources {
                        outcome.sources.clone()
                    } else {
                        Vec::new()
                    },
                }),
                None => Err(AnswerError::Index(QdrantError::InvalidUrl(
                    "index down".into(),
                ))),
            }
        }

        async fn index_health(&self) -> DependencyHealth {
            if self.outcome.is_some() {
                DependencyHealth::reachable()
            } else {
                DependencyHealth::unreachable("index down")
            }
        }
    }

    fn test_router(ingest: StubIngest, answer: StubAnswer) -> Router {
        create_router(
            Arc::new(ingest),
            Arc::new(answer),
            Arc::new(ServiceMetrics::new()),
        )
    }

    fn answering_stub() -> StubAnswer {
        StubAnswer {
            outcome: Some(ChatOutcome {
                answer: "The answer".into(),
                sources: vec![SourceRef {
                    filename: "notes.txt".into(),
                    score: 0.923,
                    content_preview: "Hello world".into(),
                }],
            }),
        }
    }

    fn multipart_body(filename: &str, content: &str) -> (String, String) {
        let boundary = "ragpipe-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn upload_returns_no_content_and_forwards_file() {
        let ingest = StubIngest::accepting();
        let app = test_router(ingest, answering_stub());
        let (content_type, body) = multipart_body("notes.txt", "Hello world");

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/ingest")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let app = test_router(StubIngest::accepting(), answering_stub());
        let boundary = "ragpipe-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"other\"\r\n\r\n\
             data\r\n\
             --{boundary}--\r\n"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/ingest")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["detail"], "No file provided");
    }

    #[tokio::test]
    async fn upload_with_disallowed_extension_maps_to_bad_request() {
        let app = test_router(StubIngest::accepting(), answering_stub());
        let (content_type, body) = multipart_body("image.png", "data");

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/ingest")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert!(
            json["detail"]
                .as_str()
                .expect("detail string")
                .contains("Invalid file type")
        );
    }

    #[tokio::test]
    async fn queue_failure_maps_to_server_error() {
        let ingest = StubIngest {
            uploads: Mutex::new(Vec::new()),
            validate: false,
            fail_queue: true,
        };
        let app = test_router(ingest, answering_stub());
        let (content_type, body) = multipart_body("notes.txt", "Hello world");

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/ingest")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn chat_rejects_blank_query_and_out_of_range_limits() {
        for payload in [
            json!({ "query": "   " }),
            json!({ "query": "hello", "max_results": 0 }),
            json!({ "query": "hello", "max_results": 21 }),
        ] {
            let app = test_router(StubIngest::accepting(), answering_stub());
            let response = app
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/api/v1/chat")
                        .header("content-type", "application/json")
                        .body(Body::from(payload.to_string()))
                        .expect("request"),
                )
                .await
                .expect("router response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn chat_returns_answer_sources_and_timing() {
        let app = test_router(StubIngest::accepting(), answering_stub());
        let payload = json!({ "query": "What does the document say?" });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["query"], "What does the document say?");
        assert_eq!(json["answer"], "The answer");
        assert_eq!(json["sources"][0]["filename"], "notes.txt");
        assert_eq!(json["sources"][0]["content_preview"], "Hello world");
        assert!(json["processing_time"].as_f64().expect("timing") >= 0.0);
    }

    #[tokio::test]
    async fn chat_without_sources_returns_empty_list() {
        let app = test_router(StubIngest::accepting(), answering_stub());
        let payload = json!({ "query": "hello", "include_sources": false });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        let json = response_json(response).await;
        assert_eq!(json["sources"].as_array().expect("sources").len(), 0);
    }

    #[tokio::test]
    async fn chat_surfaces_index_unavailability_as_server_error() {
        let app = test_router(StubIngest::accepting(), StubAnswer { outcome: None });
        let payload = json!({ "query": "hello" });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn detailed_health_rolls_up_component_statuses() {
        let app = test_router(StubIngest::accepting(), StubAnswer { outcome: None });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/api/v1/health/detailed")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["components"]["blob_store"]["reachable"], true);
        assert_eq!(json["components"]["vector_index"]["reachable"], false);
    }

    #[tokio::test]
    async fn liveness_probe_reports_healthy() {
        let app = test_router(StubIngest::accepting(), answering_stub());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "healthy");
    }
}
