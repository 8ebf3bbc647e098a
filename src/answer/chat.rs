//! Language-model client abstraction and provider adapters.
//!
//! Answers are delivered as a stream of text fragments consumed until a terminal marker.
//! The Ollama adapter streams incrementally (NDJSON frames); the OpenAI adapter performs a
//! buffered call and delivers the whole completion as one fragment. Either way the pipeline
//! contract is identical — only the transport differs.

use crate::config::{ChatProvider, Config};
use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Stream of answer fragments produced by a chat backend.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatClientError>> + Send>>;

/// Errors raised while generating an answer.
#[derive(Debug, Error)]
pub enum ChatClientError {
    /// Provider was unreachable.
    #[error("Chat provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Prompt assembled by the answer pipeline.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    /// Fixed system instruction constraining the model to the provided context.
    pub system: String,
    /// User message embedding the assembled context and the original query.
    pub user: String,
}

/// Interface implemented by language-model backends.
pub trait ChatClient: Send + Sync {
    /// Produce the answer as a stream of text fragments.
    fn generate_stream(&self, prompt: ChatPrompt) -> ChatStream;
}

/// Chat client backed by a local Ollama runtime, streaming fragments as they arrive.
pub struct OllamaChatClient {
    http: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OllamaChatClient {
    /// Construct a client against the given Ollama base URL.
    pub fn new(base_url: String, model: String, max_tokens: u32, temperature: f32) -> Self {
        let http = Client::builder()
            .user_agent("ragpipe/chat")
            .build()
            .expect("Failed to construct reqwest::Client for chat");
        Self {
            http,
            base_url,
            model,
            max_tokens,
            temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl ChatClient for OllamaChatClient {
    fn generate_stream(&self, prompt: ChatPrompt) -> ChatStream {
        let http = self.http.clone();
        let url = self.endpoint();
        let base_url = self.base_url.clone();
        let model = self.model.clone();
        let max_tokens = self.max_tokens;
        let temperature = self.temperature;

        Box::pin(try_stream! {
            let payload = json!({
                "model": model,
                "system": prompt.system,
                "prompt": prompt.user,
                "stream": true,
                "options": {
                    "temperature": temperature,
                    "num_predict": max_tokens,
                }
            });

            let response = http.post(&url).json(&payload).send().await.map_err(|error| {
                ChatClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {base_url}: {error}"
                ))
            })?;
            let response = error_for_status(response, "Ollama").await?;

            let mut body_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut done = false;
            while let Some(chunk) = body_stream.next().await {
                let chunk = chunk.map_err(|error| {
                    ChatClientError::ProviderUnavailable(format!("stream interrupted: {error}"))
                })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    let frame = parse_frame(&line)?;
                    if !frame.response.is_empty() {
                        yield frame.response;
                    }
                    if frame.done {
                        done = true;
                        break;
                    }
                }
                if done {
                    break;
                }
            }

            // A terminal frame may arrive without a trailing newline.
            if !done && !buffer.trim().is_empty() {
                let frame = parse_frame(buffer.trim())?;
                if !frame.response.is_empty() {
                    yield frame.response;
                }
            }
        })
    }
}

fn parse_frame(line: &str) -> Result<OllamaGenerateFrame, ChatClientError> {
    serde_json::from_str(line).map_err(|error| {
        ChatClientError::InvalidResponse(format!("failed to decode stream frame: {error}"))
    })
}

async fn error_for_status(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, ChatClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ChatClientError::GenerationFailed(format!(
        "{provider} returned {status}: {body}"
    )))
}

/// Chat client backed by the hosted OpenAI chat completions API.
///
/// Delivery is buffered: the completed answer is yielded as a single fragment.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatClient {
    /// Construct a client against an OpenAI-compatible base URL.
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let http = Client::builder()
            .user_agent("ragpipe/chat")
            .build()
            .expect("Failed to construct reqwest::Client for chat");
        Self {
            http,
            base_url,
            api_key,
            model,
            max_tokens,
            temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient for OpenAiChatClient {
    fn generate_stream(&self, prompt: ChatPrompt) -> ChatStream {
        let http = self.http.clone();
        let url = self.endpoint();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let max_tokens = self.max_tokens;
        let temperature = self.temperature;

        Box::pin(try_stream! {
            let payload = json!({
                "model": model,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user }
                ],
                "max_tokens": max_tokens,
                "temperature": temperature,
            });

            let mut request = http.post(&url).json(&payload);
            if let Some(api_key) = &api_key {
                request = request.bearer_auth(api_key);
            }
            let response = request.send().await.map_err(|error| {
                ChatClientError::ProviderUnavailable(format!(
                    "failed to reach chat API at {base_url}: {error}"
                ))
            })?;
            let response = error_for_status(response, "chat API").await?;

            let body: OpenAiChatResponse = response.json().await.map_err(|error| {
                ChatClientError::InvalidResponse(format!(
                    "failed to decode chat response: {error}"
                ))
            })?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    ChatClientError::InvalidResponse("response carried no choices".to_string())
                })?;

            yield content;
        })
    }
}

/// Build a chat client for the configured provider.
pub fn get_chat_client(config: &Config) -> Box<dyn ChatClient + Send + Sync> {
    match config.chat_provider {
        ChatProvider::Ollama => Box::new(OllamaChatClient::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.chat_model.clone(),
            config.chat_max_tokens,
            config.chat_temperature,
        )),
        ChatProvider::OpenAI => Box::new(OpenAiChatClient::new(
            config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            config.openai_api_key.clone(),
            config.chat_model.clone(),
            config.chat_max_tokens,
            config.chat_temperature,
        )),
    }
}
