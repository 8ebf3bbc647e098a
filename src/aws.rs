//! AWS Signature V4 signing shared by the blob store and queue clients.
//!
//! Requests are signed with pure-Rust primitives (`hmac` + `sha2`), so the service talks to
//! AWS, MinIO, or LocalStack without any C library dependencies. Header signing covers the
//! request-path clients; query-string presigning backs temporary download URLs.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while signing a request.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Endpoint URL failed to parse.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    /// Required AWS credential was not provided in the environment.
    #[error("Missing AWS credential: {0}")]
    MissingCredential(String),
    /// Signing timestamp could not be formatted.
    #[error("Failed to format signing timestamp: {0}")]
    Timestamp(String),
}

/// AWS credentials loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    /// Access key identifier (`AWS_ACCESS_KEY_ID`).
    pub access_key_id: String,
    /// Secret access key (`AWS_SECRET_ACCESS_KEY`).
    pub secret_access_key: String,
    /// Optional session token for temporary credentials (`AWS_SESSION_TOKEN`).
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, SigningError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| SigningError::MissingCredential("AWS_ACCESS_KEY_ID".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| SigningError::MissingCredential("AWS_SECRET_ACCESS_KEY".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// A fully signed request: final URL plus the headers to attach.
#[derive(Debug)]
pub struct PreparedRequest {
    /// Absolute URL including the canonical query string.
    pub url: String,
    /// Headers carrying the signature and any signed extras.
    pub headers: Vec<(String, String)>,
}

/// Sign a request with SigV4 header authentication.
///
/// `path` is the raw (unencoded) absolute path; each segment is URI-encoded for both the
/// canonical request and the returned URL. `extra_headers` are included in the signature
/// (required for `x-amz-*` headers such as the SQS target).
#[allow(clippy::too_many_arguments)]
pub fn sign_request(
    method: &str,
    base_url: &str,
    path: &str,
    query: &[(&str, String)],
    extra_headers: &[(&str, String)],
    payload: &[u8],
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
) -> Result<PreparedRequest, SigningError> {
    let (origin, host) = split_endpoint(base_url)?;
    let canonical_path = encode_path(path);
    let canonical_querystring = canonical_query(query);
    let payload_hash = hex_sha256(payload);

    let (date_stamp, amz_date) = signing_timestamps(OffsetDateTime::now_utc())?;

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    for (name, value) in extra_headers {
        headers.push((name.to_lowercase(), value.clone()));
    }
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let canonical_request = format!(
        "{method}\n{canonical_path}\n{canonical_querystring}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        region,
        service,
    );
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );

    let url = if canonical_querystring.is_empty() {
        format!("{origin}{canonical_path}")
    } else {
        format!("{origin}{canonical_path}?{canonical_querystring}")
    };

    // The host header is derived from the URL by the HTTP client; everything else is attached.
    let mut request_headers: Vec<(String, String)> =
        vec![("authorization".to_string(), authorization)];
    request_headers.extend(
        headers
            .into_iter()
            .filter(|(name, _)| name != "host"),
    );

    Ok(PreparedRequest {
        url,
        headers: request_headers,
    })
}

/// Build a presigned GET URL using SigV4 query authentication.
///
/// The payload is left unsigned (`UNSIGNED-PAYLOAD`), matching how object stores issue
/// temporary download links.
pub fn presign_get_url(
    base_url: &str,
    path: &str,
    expires_secs: u64,
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
) -> Result<String, SigningError> {
    let (origin, host) = split_endpoint(base_url)?;
    let canonical_path = encode_path(path);
    let (date_stamp, amz_date) = signing_timestamps(OffsetDateTime::now_utc())?;
    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");

    let mut query: Vec<(&str, String)> = vec![
        ("X-Amz-Algorithm", "AWS4-HMAC-SHA256".to_string()),
        (
            "X-Amz-Credential",
            format!("{}/{credential_scope}", credentials.access_key_id),
        ),
        ("X-Amz-Date", amz_date.clone()),
        ("X-Amz-Expires", expires_secs.to_string()),
        ("X-Amz-SignedHeaders", "host".to_string()),
    ];
    if let Some(token) = &credentials.session_token {
        query.push(("X-Amz-Security-Token", token.clone()));
    }

    let canonical_querystring = canonical_query(&query);
    let canonical_request = format!(
        "GET\n{canonical_path}\n{canonical_querystring}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD"
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        region,
        service,
    );
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    Ok(format!(
        "{origin}{canonical_path}?{canonical_querystring}&X-Amz-Signature={signature}"
    ))
}

/// Split an endpoint URL into its origin (`scheme://host[:port]`) and host header value.
fn split_endpoint(base_url: &str) -> Result<(String, String), SigningError> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|err| SigningError::InvalidUrl(format!("{base_url}: {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SigningError::InvalidUrl(format!("{base_url}: missing host")))?;
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((format!("{}://{host}", parsed.scheme()), host))
}

fn signing_timestamps(now: OffsetDateTime) -> Result<(String, String), SigningError> {
    let date_stamp = now
        .format(format_description!("[year][month][day]"))
        .map_err(|err| SigningError::Timestamp(err.to_string()))?;
    let amz_date = now
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))
        .map_err(|err| SigningError::Timestamp(err.to_string()))?;
    Ok((date_stamp, amz_date))
}

fn canonical_query(query: &[(&str, String)]) -> String {
    let mut sorted: Vec<_> = query.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", uri_encode(key), uri_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode per SigV4 rules: unreserved characters pass through, everything else
/// becomes uppercase `%XX`.
fn uri_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    #[test]
    fn signing_key_matches_aws_reference_vector() {
        // Published example from the SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn uri_encode_leaves_unreserved_and_escapes_the_rest() {
        assert_eq!(uri_encode("simple-key_1.txt~"), "simple-key_1.txt~");
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
        assert_eq!(uri_encode("naïve"), "na%C3%AFve");
    }

    #[test]
    fn encode_path_preserves_segment_structure() {
        assert_eq!(
            encode_path("/bucket/uploads/a b.txt"),
            "/bucket/uploads/a%20b.txt"
        );
        assert_eq!(encode_path("/"), "/");
    }

    #[test]
    fn sign_request_attaches_signature_headers() {
        let prepared = sign_request(
            "PUT",
            "http://127.0.0.1:9000",
            "/docs/uploads/notes.txt",
            &[],
            &[],
            b"Hello world",
            &test_credentials(),
            "us-east-1",
            "s3",
        )
        .expect("signed request");

        assert_eq!(prepared.url, "http://127.0.0.1:9000/docs/uploads/notes.txt");
        let authorization = prepared
            .headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone())
            .expect("authorization header");
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(
            prepared
                .headers
                .iter()
                .any(|(name, _)| name == "x-amz-content-sha256")
        );
    }

    #[test]
    fn extra_headers_are_signed() {
        let prepared = sign_request(
            "POST",
            "http://127.0.0.1:4566",
            "/",
            &[],
            &[("X-Amz-Target", "AmazonSQS.SendMessage".to_string())],
            b"{}",
            &test_credentials(),
            "us-east-1",
            "sqs",
        )
        .expect("signed request");

        let authorization = prepared
            .headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone())
            .expect("authorization header");
        assert!(authorization.contains("x-amz-target"));
        assert!(
            prepared
                .headers
                .iter()
                .any(|(name, value)| name == "x-amz-target" && value == "AmazonSQS.SendMessage")
        );
    }

    #[test]
    fn presigned_url_carries_query_signature() {
        let url = presign_get_url(
            "http://127.0.0.1:9000",
            "/docs/uploads/notes.txt",
            3600,
            &test_credentials(),
            "us-east-1",
            "s3",
        )
        .expect("presigned url");

        assert!(url.starts_with("http://127.0.0.1:9000/docs/uploads/notes.txt?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
