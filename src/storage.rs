//! S3-compatible blob store client.
//!
//! Documents are stored under generated keys (`uploads/{timestamp}_{filename}`) and fetched
//! back by the worker during processing. A custom endpoint switches the client into
//! path-style addressing for S3-compatible services (MinIO, LocalStack); without one,
//! virtual-hosted AWS addressing is used.

use crate::aws::{self, AwsCredentials, SigningError};
use crate::config::Config;
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

/// Expiry applied to presigned download URLs, in seconds.
const PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Errors returned while interacting with the blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Request signing failed before anything was sent.
    #[error("Failed to sign storage request: {0}")]
    Signing(#[from] SigningError),
    /// HTTP layer failed before receiving a response.
    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Blob store responded with an unexpected status code.
    #[error("Unexpected storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the blob store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Lightweight HTTP client for blob store operations.
pub struct S3StorageService {
    client: Client,
    base_url: String,
    path_prefix: String,
    bucket: String,
    region: String,
    credentials: AwsCredentials,
}

impl S3StorageService {
    /// Construct a client for the given endpoint, bucket, and credentials.
    pub fn new(
        endpoint_url: Option<String>,
        bucket: String,
        region: String,
        credentials: AwsCredentials,
    ) -> Result<Self, StorageError> {
        let client = Client::builder().user_agent("ragpipe/0.1").build()?;
        let (base_url, path_prefix) = match endpoint_url {
            // Path-style addressing against a custom endpoint.
            Some(endpoint) => (
                endpoint.trim_end_matches('/').to_string(),
                format!("/{bucket}"),
            ),
            None => (
                format!("https://{bucket}.s3.{region}.amazonaws.com"),
                String::new(),
            ),
        };
        tracing::debug!(endpoint = %base_url, bucket = %bucket, "Initialized blob store client");

        Ok(Self {
            client,
            base_url,
            path_prefix,
            bucket,
            region,
            credentials,
        })
    }

    /// Construct a client from the loaded configuration, reading credentials from the
    /// environment.
    pub fn from_config(config: &Config, credentials: AwsCredentials) -> Result<Self, StorageError> {
        Self::new(
            config.s3_endpoint_url.clone(),
            config.s3_bucket_name.clone(),
            config.aws_region.clone(),
            credentials,
        )
    }

    /// Create the bucket when it does not exist yet.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let response = self.send(Method::HEAD, &self.bucket_path(), &[], Vec::new()).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::debug!(bucket = %self.bucket, "Creating bucket");
                let response = self
                    .send(Method::PUT, &self.bucket_path(), &[], Vec::new())
                    .await?;
                self.ensure_success(response).await
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::UnexpectedStatus { status, body })
            }
        }
    }

    /// Store a blob under the given key.
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let byte_count = bytes.len();
        let response = self
            .send(
                Method::PUT,
                &self.object_path(key),
                &[("content-type", content_type.to_string())],
                bytes,
            )
            .await?;
        self.ensure_success(response).await?;
        tracing::debug!(key, bytes = byte_count, "Blob stored");
        Ok(())
    }

    /// Fetch a blob by key.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .send(Method::GET, &self.object_path(key), &[], Vec::new())
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UnexpectedStatus { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Remove a blob by key.
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .send(Method::DELETE, &self.object_path(key), &[], Vec::new())
            .await?;
        // DELETE returns 204 for present and absent keys alike.
        self.ensure_success(response).await
    }

    /// Issue a temporary presigned GET URL for the given key.
    pub fn presigned_get_url(&self, key: &str) -> Result<String, StorageError> {
        let url = aws::presign_get_url(
            &self.base_url,
            &self.object_path(key),
            PRESIGN_EXPIRY_SECS,
            &self.credentials,
            &self.region,
            "s3",
        )?;
        Ok(url)
    }

    /// Probe reachability of the blob store for health reporting.
    pub async fn health_probe(&self) -> Result<(), StorageError> {
        self.ensure_bucket().await
    }

    /// Compose the storage key for an uploaded file: `uploads/{timestamp}_{filename}`.
    pub fn object_key_for(filename: &str) -> String {
        let timestamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .unwrap_or_else(|_| "19700101_000000".to_string());
        format!("uploads/{timestamp}_{filename}")
    }

    fn bucket_path(&self) -> String {
        if self.path_prefix.is_empty() {
            "/".to_string()
        } else {
            self.path_prefix.clone()
        }
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.path_prefix, key.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        extra_headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, StorageError> {
        let prepared = aws::sign_request(
            method.as_str(),
            &self.base_url,
            path,
            &[],
            extra_headers,
            &body,
            &self.credentials,
            &self.region,
            "s3",
        )?;

        let mut request = self.client.request(method, &prepared.url);
        for (name, value) in &prepared.headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), StorageError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = StorageError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Blob store request failed");
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::HEAD, Method::PUT, MockServer};

    fn test_service(base_url: String) -> S3StorageService {
        S3StorageService::new(
            Some(base_url),
            "docs".into(),
            "us-east-1".into(),
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
        )
        .expect("storage client")
    }

    #[tokio::test]
    async fn put_object_targets_bucket_key_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/docs/uploads/notes.txt")
                    .header("content-type", "text/plain")
                    .body("Hello world");
                then.status(200);
            })
            .await;

        let service = test_service(server.base_url());
        service
            .put_object("uploads/notes.txt", b"Hello world".to_vec(), "text/plain")
            .await
            .expect("put object");

        mock.assert();
    }

    #[tokio::test]
    async fn get_object_returns_blob_bytes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/uploads/notes.txt");
                then.status(200).body("Hello world");
            })
            .await;

        let service = test_service(server.base_url());
        let bytes = service
            .get_object("uploads/notes.txt")
            .await
            .expect("get object");
        assert_eq!(bytes, b"Hello world");
    }

    #[tokio::test]
    async fn missing_object_surfaces_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/uploads/gone.txt");
                then.status(404).body("NoSuchKey");
            })
            .await;

        let service = test_service(server.base_url());
        let error = service
            .get_object("uploads/gone.txt")
            .await
            .expect_err("missing object");
        assert!(matches!(
            error,
            StorageError::UnexpectedStatus {
                status: StatusCode::NOT_FOUND,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ensure_bucket_creates_on_404() {
        let server = MockServer::start_async().await;
        let head = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/docs");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/docs");
                then.status(200);
            })
            .await;

        let service = test_service(server.base_url());
        service.ensure_bucket().await.expect("bucket ensured");

        head.assert();
        create.assert();
    }

    #[tokio::test]
    async fn delete_object_tolerates_absent_keys() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::DELETE)
                    .path("/docs/uploads/notes.txt");
                then.status(204);
            })
            .await;

        let service = test_service(server.base_url());
        service
            .delete_object("uploads/notes.txt")
            .await
            .expect("delete object");

        mock.assert();
    }

    #[test]
    fn object_keys_are_prefixed_with_timestamp() {
        let key = S3StorageService::object_key_for("notes.txt");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("_notes.txt"));
    }

    #[test]
    fn presigned_url_points_at_object() {
        let service = test_service("http://127.0.0.1:9000".into());
        let url = service
            .presigned_get_url("uploads/notes.txt")
            .expect("presigned url");
        assert!(url.starts_with("http://127.0.0.1:9000/docs/uploads/notes.txt?"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
