//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::qdrant::types::{
    ChunkPoint, CollectionInfoResponse, CollectionStats, QdrantError, QueryResponse,
    QueryResponseResult, ScoredPoint, ScrollResponse,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for vector index operations against a single collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
    pub(crate) dimension: usize,
}

impl QdrantService {
    /// Construct a new client bound to one collection with a fixed vector dimension.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: String,
        dimension: usize,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("ragpipe/0.1").build()?;
        let base_url = normalize_base_url(base_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %collection,
            dimension,
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection,
            dimension,
        })
    }

    /// Construct a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, QdrantError> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.qdrant_collection_name.clone(),
            config.embedding_dimension,
        )
    }

    /// Create the collection when it is missing, with the configured dimension and cosine
    /// distance, and ensure the payload index used for source-key filters.
    pub async fn ensure_collection(&self) -> Result<(), QdrantError> {
        if !self.collection_exists().await? {
            tracing::debug!(
                collection = %self.collection,
                dimension = self.dimension,
                "Creating collection"
            );
            let body = json!({
                "vectors": {
                    "size": self.dimension,
                    "distance": "Cosine"
                }
            });
            let response = self
                .request(Method::PUT, &format!("collections/{}", self.collection))?
                .json(&body)
                .send()
                .await?;
            self.ensure_success(response, || {
                tracing::debug!(collection = %self.collection, "Collection created");
            })
            .await?;
        }
        self.ensure_payload_index("source_key", "keyword").await
    }

    /// Insert or replace points by id.
    ///
    /// Every vector is validated against the collection dimension before anything is sent;
    /// a single mismatch rejects the whole batch.
    pub async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }
        for point in &points {
            if point.vector.len() != self.dimension {
                return Err(QdrantError::DimensionMismatch {
                    expected: self.dimension,
                    actual: point.vector.len(),
                });
            }
        }

        let serialized: Vec<_> = points
            .iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();
        let point_count = serialized.len();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = point_count, "Points upserted");
        })
        .await?;

        Ok(point_count)
    }

    /// Perform a similarity search, returning scored payloads ranked by descending score.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect();

        Ok(results)
    }

    /// Delete every point whose payload field equals the given value.
    pub async fn delete_by_filter(&self, field: &str, value: &str) -> Result<(), QdrantError> {
        let body = json!({ "filter": match_filter(field, value) });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, field, value, "Points deleted by filter");
        })
        .await
    }

    /// Check whether any point matches the given payload field value.
    pub async fn exists_by_filter(&self, field: &str, value: &str) -> Result<bool, QdrantError> {
        let body = json!({
            "limit": 1,
            "with_payload": false,
            "with_vector": false,
            "filter": match_filter(field, value),
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/scroll", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Existence probe failed");
            return Err(error);
        }

        let ScrollResponse { result } = response.json().await?;
        Ok(!result.points.is_empty())
    }

    /// Retrieve the point count and status of the collection.
    pub async fn collection_stats(&self) -> Result<CollectionStats, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QdrantError::UnexpectedStatus { status, body });
        }

        let payload: CollectionInfoResponse = response.json().await?;
        Ok(CollectionStats {
            points_count: payload.result.points_count.unwrap_or(0),
            status: payload.result.status.unwrap_or_else(|| "unknown".into()),
        })
    }

    /// Probe reachability of the vector index for health reporting.
    pub async fn health_probe(&self) -> Result<(), QdrantError> {
        let response = self.request(Method::GET, "collections")?.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(QdrantError::UnexpectedStatus { status, body })
        }
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn ensure_payload_index(&self, field: &str, schema: &str) -> Result<(), QdrantError> {
        let body = json!({
            "field_name": field,
            "field_schema": schema,
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}/index", self.collection))?
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::warn!(collection = %self.collection, field, schema, error = %error, "Failed to ensure payload index");
            Err(error)
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn match_filter(field: &str, value: &str) -> Value {
    json!({
        "must": [
            {
                "key": field,
                "match": { "value": value }
            }
        ]
    })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qdrant::types::ChunkPayload;
    use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};

    fn test_service(base_url: String, dimension: usize) -> QdrantService {
        QdrantService::new(&base_url, None, "documents".into(), dimension).expect("qdrant client")
    }

    fn test_payload(chunk_id: usize) -> ChunkPayload {
        ChunkPayload {
            content: "Example".into(),
            filename: "notes.txt".into(),
            source_key: "uploads/20250101_000000_notes.txt".into(),
            chunk_id,
            chunk_size: 512,
        }
    }

    #[tokio::test]
    async fn search_emits_expected_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/query");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": [
                        {
                            "id": "point-1",
                            "score": 0.92,
                            "payload": {
                                "content": "Example",
                                "filename": "notes.txt",
                                "source_key": "uploads/20250101_000000_notes.txt",
                                "chunk_id": 0,
                                "chunk_size": 512
                            }
                        }
                    ]
                }));
            })
            .await;

        let service = test_service(server.base_url(), 3);
        let results = service.search(vec![0.1, 0.2, 0.3], 5).await.expect("search");

        mock.assert();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "point-1");
        assert!((results[0].score - 0.92).abs() < f32::EPSILON);
        let payload = results[0].payload.as_ref().expect("payload");
        assert_eq!(payload["filename"], Value::String("notes.txt".into()));
    }

    #[tokio::test]
    async fn upsert_rejects_dimension_mismatch_before_sending() {
        let server = MockServer::start_async().await;
        let catch_all = server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(500);
            })
            .await;

        let service = test_service(server.base_url(), 3);
        let point = ChunkPoint::new(vec![0.1, 0.2], test_payload(0));
        let error = service
            .upsert_points(vec![point])
            .await
            .expect_err("dimension mismatch");

        assert!(matches!(
            error,
            QdrantError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(catch_all.hits(), 0);
    }

    #[tokio::test]
    async fn upsert_sends_points_with_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents/points")
                    .query_param("wait", "true")
                    .body_contains("notes.txt");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let service = test_service(server.base_url(), 2);
        let count = service
            .upsert_points(vec![ChunkPoint::new(vec![0.5, 0.5], test_payload(0))])
            .await
            .expect("upsert");

        mock.assert();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn exists_by_filter_reports_presence() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/scroll")
                    .body_contains("source_key");
                then.status(200).json_body(json!({
                    "result": { "points": [ { "id": "point-1" } ] }
                }));
            })
            .await;

        let service = test_service(server.base_url(), 2);
        let exists = service
            .exists_by_filter("source_key", "uploads/20250101_000000_notes.txt")
            .await
            .expect("probe");
        assert!(exists);
    }

    #[tokio::test]
    async fn exists_by_filter_reports_absence() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/scroll");
                then.status(200)
                    .json_body(json!({ "result": { "points": [] } }));
            })
            .await;

        let service = test_service(server.base_url(), 2);
        let exists = service
            .exists_by_filter("source_key", "uploads/none.txt")
            .await
            .expect("probe");
        assert!(!exists);
    }

    #[tokio::test]
    async fn ensure_collection_creates_when_missing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents")
                    .body_contains("Cosine");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;
        let index = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/documents/index");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let service = test_service(server.base_url(), 384);
        service.ensure_collection().await.expect("ensure");

        create.assert();
        index.assert();
    }

    #[tokio::test]
    async fn delete_by_filter_targets_matching_points() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/delete")
                    .body_contains("uploads/20250101_000000_notes.txt");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let service = test_service(server.base_url(), 2);
        service
            .delete_by_filter("source_key", "uploads/20250101_000000_notes.txt")
            .await
            .expect("delete");

        mock.assert();
    }

    #[tokio::test]
    async fn collection_stats_exposes_point_count() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(200).json_body(json!({
                    "result": { "points_count": 42, "status": "green" }
                }));
            })
            .await;

        let service = test_service(server.base_url(), 2);
        let stats = service.collection_stats().await.expect("stats");
        assert_eq!(stats.points_count, 42);
        assert_eq!(stats.status, "green");
    }
}
