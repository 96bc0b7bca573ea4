//! Text-generation providers.
//!
//! [`TextProvider`] is the seam between the fallback chain and an upstream
//! model.  Two wire protocols are implemented:
//!
//! * [`AnthropicProvider`]: Anthropic Messages API (`/v1/messages`).
//! * [`ChatCompletionsProvider`]: any OpenAI-compatible
//!   `/v1/chat/completions` endpoint (OpenAI, OpenRouter, Ollama …).
//!
//! Non-2xx responses are failures carrying the status and body.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::AssistantError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport or connection failure.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("no API key configured for {0}")]
    MissingKey(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

impl From<ProviderError> for AssistantError {
    fn from(e: ProviderError) -> Self {
        let message = e.to_string();
        let err = match &e {
            ProviderError::Request(_) | ProviderError::Timeout => AssistantError::network(message),
            ProviderError::Status { status, .. } if *status == 429 || *status >= 500 => {
                AssistantError::service_unavailable(message)
            }
            ProviderError::Status { .. } | ProviderError::MissingKey(_) => {
                AssistantError::unknown(message).with_retryable(false)
            }
            ProviderError::Parse(_) | ProviderError::EmptyResponse => AssistantError::unknown(message),
        };
        err.with_cause(e)
    }
}

// ---------------------------------------------------------------------------
// TextProvider
// ---------------------------------------------------------------------------

/// One prompt for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw response body chunks of a streaming call.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Start a streaming completion; the body is a line-delimited
    /// `data: …` event stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError>;
}

/// Build the HTTP client shared by providers.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Instantiate the provider described by `config`.
pub fn build_provider(config: &ProviderConfig, client: reqwest::Client) -> Arc<dyn TextProvider> {
    match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config.clone(), client)),
        ProviderKind::OpenAiCompatible => {
            Arc::new(ChatCompletionsProvider::new(config.clone(), client))
        }
    }
}

/// Send `request`, turning non-2xx statuses into [`ProviderError::Status`].
async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn into_byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProviderError::from)),
    )
}

fn non_empty_text(value: &serde_json::Value) -> Result<String, ProviderError> {
    let text = value.as_str().ok_or(ProviderError::EmptyResponse)?.trim();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text.to_string())
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    fn request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::MissingKey(self.config.name.clone()))?;

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model":       self.config.model,
            "max_tokens":  request.max_tokens,
            "temperature": request.temperature,
            "system":      request.system_prompt,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
            "stream":      stream
        });

        Ok(self
            .client
            .post(url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body))
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = send_checked(self.request(request, false)?).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        non_empty_text(&json["content"][0]["text"])
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError> {
        let response = send_checked(self.request(request, true)?).await?;
        Ok(into_byte_stream(response))
    }
}

// ---------------------------------------------------------------------------
// ChatCompletionsProvider
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions.
///
/// The `Authorization: Bearer …` header is attached only when an API key is
/// configured, so local endpoints such as Ollama work without one.
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ChatCompletionsProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    fn request(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model":       self.config.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user",   "content": request.prompt }
            ],
            "stream":      stream,
            "temperature": request.temperature,
            "max_tokens":  request.max_tokens
        });

        let mut req = self.client.post(url).json(&body);

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }
        if let Some(referer) = &self.config.referer {
            req = req.header("HTTP-Referer", referer);
        }
        req
    }
}

#[async_trait]
impl TextProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = send_checked(self.request(request, false)).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        non_empty_text(&json["choices"][0]["message"]["content"])
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError> {
        let response = send_checked(self.request(request, true)).await?;
        Ok(into_byte_stream(response))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
