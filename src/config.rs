use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Ragpipe server and worker processes.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port (defaults to 8000).
    pub server_port: Option<u16>,
    /// Optional custom endpoint for the blob store (MinIO, LocalStack).
    /// When unset, virtual-hosted AWS addressing is used.
    pub s3_endpoint_url: Option<String>,
    /// Bucket that receives uploaded documents.
    pub s3_bucket_name: String,
    /// AWS region used for request signing.
    pub aws_region: String,
    /// Optional custom endpoint for the work queue.
    pub sqs_endpoint_url: Option<String>,
    /// Name of the ingestion task queue.
    pub sqs_queue_name: String,
    /// Visibility timeout applied when the queue is created, in seconds.
    pub queue_visibility_timeout_secs: u64,
    /// Backoff between worker polls after a receive error, in seconds.
    pub worker_poll_interval_secs: u64,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Language-model provider used for answer synthesis.
    pub chat_provider: ChatProvider,
    /// Generation model identifier passed to the chat provider.
    pub chat_model: String,
    /// Token budget for generated answers.
    pub chat_max_tokens: u32,
    /// Sampling temperature for generated answers.
    pub chat_temperature: f32,
    /// Optional override for the local Ollama runtime URL.
    pub ollama_url: Option<String>,
    /// API key for hosted OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Optional override for the OpenAI-compatible base URL.
    pub openai_base_url: Option<String>,
    /// Maximum characters per chunk produced by the splitter.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

/// Supported language-model backends for answer synthesis.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            s3_endpoint_url: load_env_optional("S3_ENDPOINT_URL"),
            s3_bucket_name: load_env("S3_BUCKET_NAME")?,
            aws_region: load_env_optional("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            sqs_endpoint_url: load_env_optional("SQS_ENDPOINT_URL"),
            sqs_queue_name: load_env("SQS_QUEUE_NAME")?,
            queue_visibility_timeout_secs: parse_optional("QUEUE_VISIBILITY_TIMEOUT_SECS", 300)?,
            worker_poll_interval_secs: parse_optional("WORKER_POLL_INTERVAL_SECS", 5)?,
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_optional("EMBEDDING_DIMENSION", 384)?,
            chat_provider: load_env("CHAT_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("CHAT_PROVIDER".to_string()))?,
            chat_model: load_env("CHAT_MODEL")?,
            chat_max_tokens: parse_optional("CHAT_MAX_TOKENS", 512)?,
            chat_temperature: parse_optional("CHAT_TEMPERATURE", 0.7)?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            chunk_size: parse_optional("CHUNK_SIZE", 512)?,
            chunk_overlap: parse_optional("CHUNK_OVERLAP", 50)?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ChatProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        bucket = %config.s3_bucket_name,
        queue = %config.sqs_queue_name,
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        chat_provider = ?config.chat_provider,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
