//! Embedding and chat model gateway.
//!
//! Everything that talks to the model oracle goes through [`ModelGateway`]:
//! `embed` turns text into a vector, `generate` runs a chat completion, and
//! `generate_stream` yields the completion incrementally. [`OllamaGateway`]
//! implements it against the Ollama HTTP API (`/api/embed`, `/api/chat`);
//! tests substitute deterministic fakes.
//!
//! # Retry
//!
//! Non-streaming calls retry on timeouts, network errors, HTTP 429 and 5xx,
//! with exponential backoff (1s, 2s, 4s, ... capped at 32s), up to
//! `ollama.max_retries` extra attempts. Other 4xx responses fail at once.
//! Streaming calls are never retried.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::OllamaConfig;
use crate::error::OracleError;

/// Ordered completion fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, OracleError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request.
///
/// ```rust
/// use ragbench::gateway::ChatRequest;
///
/// let req = ChatRequest::new("mistral")
///     .system("Be brief.")
///     .user("What is a State Provider?")
///     .json_format();
/// assert_eq!(req.messages.len(), 2);
/// assert!(req.json);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    /// Ask the oracle for a JSON-formatted reply.
    pub json: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: 0.0,
            json: false,
        }
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::system(content));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json_format(mut self) -> Self {
        self.json = true;
        self
    }

    /// Body for `POST /api/chat`.
    pub fn to_body(&self, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "stream": stream,
            "options": { "temperature": self.temperature },
        });
        if self.json {
            body["format"] = Value::String("json".to_string());
        }
        body
    }
}

/// The model oracle.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Embed `text` with the configured embedding model.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError>;

    /// Run a chat completion. `Ok(None)` means the oracle answered without a
    /// `message.content` field.
    async fn generate(&self, request: &ChatRequest) -> Result<Option<String>, OracleError>;

    /// Run a chat completion, yielding content fragments in order.
    async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream, OracleError>;
}

/// [`ModelGateway`] backed by an Ollama server.
pub struct OllamaGateway {
    client: reqwest::Client,
    base_url: String,
    embed_model: String,
    timeout: Duration,
    embed_timeout: Duration,
    idle_timeout: Duration,
    max_retries: u32,
}

impl OllamaGateway {
    pub fn new(config: &OllamaConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OracleError::Transport {
                endpoint: config.url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            embed_model: config.embed_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, OracleError> {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                warn!(endpoint = %endpoint, attempt, ?delay, "retrying oracle call");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&endpoint, body, timeout).await {
                Ok(json) => return Ok(json),
                Err(e) if e.is_retryable() => {
                    debug!(endpoint = %endpoint, error = %e, "oracle call failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(OracleError::Transport {
            endpoint,
            message: "no attempt was made".to_string(),
        }))
    }

    async fn send_once(
        &self,
        endpoint: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, OracleError> {
        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::from_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout {
                    endpoint: endpoint.to_string(),
                }
            } else {
                OracleError::Malformed(format!("invalid JSON from {}: {}", endpoint, e))
            }
        })
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": text,
        });
        let json = self.post_json("/api/embed", &body, self.embed_timeout).await?;
        parse_embedding(&json)
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Option<String>, OracleError> {
        let json = self
            .post_json("/api/chat", &request.to_body(false), self.timeout)
            .await?;
        Ok(json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string))
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream, OracleError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        // Bounds only the wait for response headers; the body is governed by
        // the idle timeout.
        let send = self
            .client
            .post(&endpoint)
            .json(&request.to_body(true))
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| OracleError::Timeout {
                endpoint: endpoint.clone(),
            })?
            .map_err(|e| OracleError::from_reqwest(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let source = endpoint.clone();
        let bytes = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| OracleError::from_reqwest(&source, e)));

        Ok(ndjson_tokens(bytes, &endpoint, self.idle_timeout))
    }
}

/// Extract the first vector from an `/api/embed` (`embeddings`) or legacy
/// `/api/embeddings` (`embedding`) response.
fn parse_embedding(json: &Value) -> Result<Vec<f32>, OracleError> {
    let array = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|list| list.first())
        .or_else(|| json.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| OracleError::Malformed("missing embeddings array".to_string()))?;

    array
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| OracleError::Malformed("embedding value is not a number".to_string()))
        })
        .collect()
}

struct NdjsonState<S> {
    bytes: Pin<Box<S>>,
    endpoint: String,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, OracleError>>,
    finished: bool,
    idle_timeout: Duration,
}

impl<S> NdjsonState<S> {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.parse_line(&line);
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn parse_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let json: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping unparsable stream line");
                return;
            }
        };

        if let Some(content) = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            if !content.is_empty() {
                self.pending.push_back(Ok(content.to_string()));
            }
        }

        if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
            self.finished = true;
        }
    }
}

/// Turn a newline-delimited JSON byte stream into content fragments.
///
/// Lines may be split across chunks. The stream ends at the first object with
/// `"done": true`, or at end of input after parsing any unterminated last
/// line. If no bytes arrive for `idle_timeout`, a single
/// [`OracleError::Timeout`] is yielded and the stream ends.
pub fn ndjson_tokens<S, B>(bytes: S, endpoint: &str, idle_timeout: Duration) -> TokenStream
where
    S: Stream<Item = Result<B, OracleError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = NdjsonState {
        bytes: Box::pin(bytes),
        endpoint: endpoint.to_string(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        idle_timeout,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match tokio::time::timeout(st.idle_timeout, st.bytes.next()).await {
                Err(_) => {
                    st.finished = true;
                    let err = OracleError::Timeout {
                        endpoint: st.endpoint.clone(),
                    };
                    return Some((Err(err), st));
                }
                Ok(None) => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    st.parse_line(&rest);
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                Ok(Some(Ok(chunk))) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
            }
        }
    }))
}
