//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with role-tagged message history
//! - `/api/tags` - List available models
//!
//! Streaming responses are newline-delimited JSON objects carrying
//! `message.content` fragments and a final `done: true` marker.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{LlmBackend, LlmRequest, ModelInfo, StreamingToken};

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self::new(host, port)
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for a streaming chat request
    fn build_body(request: &LlmRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
        });

        let mut options = serde_json::Map::new();
        if (request.temperature - 0.7).abs() > f32::EPSILON {
            options.insert(
                "temperature".to_string(),
                serde_json::json!(request.temperature),
            );
        }
        if request.max_tokens > 0 {
            options.insert(
                "num_predict".to_string(),
                serde_json::json!(request.max_tokens),
            );
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }

        body
    }

    /// Extract the content fragment from one response object
    fn content_of(data: &serde_json::Value) -> Option<&str> {
        data.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
    }

    /// Models listed in an `/api/tags` response
    fn parse_models(data: &serde_json::Value) -> Vec<ModelInfo> {
        data.get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let name = m.get("name")?.as_str()?.to_string();
                        let size = m.get("size").and_then(serde_json::Value::as_u64);
                        let parameters = m
                            .get("details")
                            .and_then(|d| d.get("parameter_size"))
                            .and_then(|p| p.as_str())
                            .map(String::from);

                        Some(ModelInfo {
                            name,
                            size,
                            parameters,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Splits a byte stream into newline-terminated lines
///
/// Bytes are held until their line is complete, so a UTF-8 sequence split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completes (trimmed, non-empty)
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };

                // Newline-delimited JSON
                for line in lines.push(&bytes) {
                    let data = match serde_json::from_str::<serde_json::Value>(&line) {
                        Ok(data) => data,
                        Err(e) => {
                            let _ = tx
                                .send(StreamingToken::Error(format!(
                                    "malformed response line: {e}"
                                )))
                                .await;
                            return;
                        }
                    };

                    if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
                        let _ = tx.send(StreamingToken::Error(error.to_string())).await;
                        return;
                    }

                    if let Some(token) = Self::content_of(&data) {
                        if !token.is_empty() {
                            full_response.push_str(token);
                            if tx
                                .send(StreamingToken::Token(token.to_string()))
                                .await
                                .is_err()
                            {
                                // Receiver dropped, stop streaming
                                return;
                            }
                        }
                    }

                    if data
                        .get("done")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false)
                    {
                        let _ = tx
                            .send(StreamingToken::Complete {
                                message: full_response,
                            })
                            .await;
                        return;
                    }
                }
            }

            // Stream ended without done signal
            let _ = tx
                .send(StreamingToken::Error(
                    "stream ended without completion marker".to_string(),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: serde_json::Value = response.json().await?;
        Ok(Self::parse_models(&data))
    }
}
