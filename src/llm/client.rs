use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::llm::prompts::{RECORDS_GRAMMAR, records_schema};

/// Errors from a single backend call
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// The backend answered, but no attempt produced a parseable record
    /// array. Terminal for the chunk.
    #[error("invalid structured output after {attempts} attempts: {detail}")]
    InvalidOutput { attempts: u32, detail: String },
}

impl InferenceError {
    /// Transient failures are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Http(e) => e.is_timeout() || e.is_connect(),
            InferenceError::Backend { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            InferenceError::InvalidOutput { .. } => false,
        }
    }
}

/// Which model runtime serves the structured calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama chat endpoint with a JSON schema constraint
    Ollama,
    /// llama.cpp HTTP server with a GBNF grammar constraint
    LlamaServer,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ollama" => Some(BackendKind::Ollama),
            "llama-server" => Some(BackendKind::LlamaServer),
            _ => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "http://localhost:11434",
            BackendKind::LlamaServer => "http://localhost:8080",
        }
    }
}

/// Configuration for the inference backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Server base URL
    pub base_url: String,
    /// Model name (Ollama) - llama-server serves whatever it loaded
    pub model: String,
    /// Decoding temperature; zero for fully deterministic output
    pub temperature: f64,
    /// Maximum tokens in one response
    pub max_tokens: u32,
    /// Per-request timeout; hitting it is a recoverable chunk failure
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.0,
            max_tokens: 2048,
            request_timeout: Duration::from_secs(240),
        }
    }
}

/// Capability interface over the model runtime: instruction text in, raw
/// constrained output text out. The runtime is a shared stateful resource;
/// callers go through a `BackendPool` to bound in-flight calls.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// One structured parsing call under deterministic decoding
    async fn parse_chunk(&self, system: &str, user: &str) -> Result<String, InferenceError>;

    /// Cheap reachability check used at startup; failure here is a
    /// setup-level error, not a chunk failure
    async fn probe(&self) -> Result<(), InferenceError>;
}

/// Construct the configured backend
pub fn build_backend(config: &BackendConfig) -> Arc<dyn InferenceBackend> {
    match config.kind {
        BackendKind::Ollama => Arc::new(OllamaClient::new(config.clone())),
        BackendKind::LlamaServer => Arc::new(LlamaServerClient::new(config.clone())),
    }
}

/// Bounds the number of in-flight model calls. A loaded model instance is
/// non-reentrant, so the default pool size is one; a larger pool is only
/// correct when the runtime actually serves that many instances.
pub struct BackendPool {
    backend: Arc<dyn InferenceBackend>,
    permits: Semaphore,
}

impl BackendPool {
    pub fn new(backend: Arc<dyn InferenceBackend>, capacity: usize) -> Self {
        Self {
            backend,
            permits: Semaphore::new(capacity.max(1)),
        }
    }

    pub async fn parse_chunk(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        self.backend.parse_chunk(system, user).await
    }
}

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Backend { status, body })
}

/// Client for an Ollama server
pub struct OllamaClient {
    client: Client,
    config: BackendConfig,
}

impl OllamaClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: http_client(config.request_timeout),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn parse_chunk(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: false,
            format: records_schema(),
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: 1.0,
                num_predict: self.config.max_tokens,
                stop: vec!["```".to_string(), "</s>".to_string()],
            },
        };

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let response: OllamaChatResponse = response.json().await?;
        Ok(response.message.content)
    }

    async fn probe(&self) -> Result<(), InferenceError> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        error_for_status(response).await?;
        Ok(())
    }
}

/// Client for a llama.cpp HTTP server
pub struct LlamaServerClient {
    client: Client,
    config: BackendConfig,
}

impl LlamaServerClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: http_client(config.request_timeout),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl InferenceBackend for LlamaServerClient {
    async fn parse_chunk(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let request = CompletionRequest {
            prompt: format!("{system}\n\n{user}"),
            temperature: self.config.temperature,
            top_p: 1.0,
            n_predict: self.config.max_tokens,
            grammar: RECORDS_GRAMMAR.to_string(),
            stop: vec!["</s>".to_string()],
        };

        let response = self
            .client
            .post(self.url("/completion"))
            .json(&request)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let response: CompletionResponse = response.json().await?;
        Ok(response.content)
    }

    async fn probe(&self) -> Result<(), InferenceError> {
        let response = self.client.get(self.url("/health")).send().await?;
        error_for_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: serde_json::Value,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    temperature: f64,
    top_p: f64,
    n_predict: u32,
    grammar: String,
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ollama_parse_chunk_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "[]"}
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(BackendConfig::new(
            BackendKind::Ollama,
            server.uri(),
            "test-model",
        ));
        let content = client.parse_chunk("system", "user").await.unwrap();
        assert_eq!(content, "[]");
    }

    #[tokio::test]
    async fn test_ollama_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(BackendConfig::new(
            BackendKind::Ollama,
            server.uri(),
            "test-model",
        ));
        let err = client.parse_chunk("system", "user").await.unwrap_err();
        assert!(matches!(err, InferenceError::Backend { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_llama_server_parse_chunk_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "[{\"time\": null}]"
            })))
            .mount(&server)
            .await;

        let client = LlamaServerClient::new(BackendConfig::new(
            BackendKind::LlamaServer,
            server.uri(),
            "ignored",
        ));
        let content = client.parse_chunk("system", "user").await.unwrap();
        assert_eq!(content, "[{\"time\": null}]");
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_live_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        let client = OllamaClient::new(BackendConfig::new(
            BackendKind::Ollama,
            server.uri(),
            "test-model",
        ));
        assert!(client.probe().await.is_ok());
    }

    #[test]
    fn test_backend_kind_from_name() {
        assert_eq!(BackendKind::from_name("ollama"), Some(BackendKind::Ollama));
        assert_eq!(
            BackendKind::from_name("llama-server"),
            Some(BackendKind::LlamaServer)
        );
        assert_eq!(BackendKind::from_name("gpt4"), None);
    }
}
