//! Wire transport to Ollama-compatible runtimes
//!
//! Both runtimes (Ollama and the MLX bridge) speak the same API:
//! `POST /api/chat` for a non-streaming completion and `GET /api/tags` for
//! the list of installed models.

use crate::error::TransportError;
use crate::memory::Turn;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bound for the lightweight model listing call.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub stream: bool,
    pub options: ChatOptions,
    /// Seconds the runtime keeps the model resident after the call.
    pub keep_alive: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<Turn>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            stream: false,
            options: ChatOptions { temperature: 0.1 },
            keep_alive: keep_alive_secs(model),
        }
    }
}

/// Large models are evicted quickly to free memory, small ones stay warm.
pub fn keep_alive_secs(model: &str) -> u64 {
    let m = model.to_lowercase();
    let has = |tags: &[&str]| tags.iter().any(|t| m.contains(t));

    if has(&["70b", "104b"]) {
        60
    } else if has(&["32b", "30b", "qwq"]) {
        300
    } else if has(&["7b", "8b", "14b"]) {
        600
    } else if has(&["3b", "1b", "tiny"]) {
        3600
    } else {
        300
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Seam between the fallback policy and the network.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat(
        &self,
        base_url: &str,
        request: &ChatRequest,
        timeout: Duration,
    ) -> std::result::Result<String, TransportError>;

    async fn list_models(&self, base_url: &str) -> std::result::Result<Vec<String>, TransportError>;
}

/// reqwest-backed transport (connection-pooled)
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn chat(
        &self,
        base_url: &str,
        request: &ChatRequest,
        timeout: Duration,
    ) -> std::result::Result<String, TransportError> {
        let url = format!("{}/api/chat", base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::Body(e.to_string()))?;

        // Some runtimes report a dead model runner with 200 + {"error": ...}
        if let Some(error) = parsed.error {
            return Err(TransportError::Status {
                code: 500,
                body: error,
            });
        }

        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| TransportError::Body("reply has no message".to_string()))
    }

    async fn list_models(&self, base_url: &str) -> std::result::Result<Vec<String>, TransportError> {
        let url = format!("{}/api/tags", base_url);

        let response = self
            .client
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                code: response.status().as_u16(),
                body: String::new(),
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}
