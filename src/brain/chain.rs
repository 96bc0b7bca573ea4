//! [`Brain`]: security-gated, cache-checked provider fallback chain.
//!
//! # `think` flow
//!
//! ```text
//! validate_input ──✗──▶ VALIDATION_ERROR (no cache lookup, no provider call)
//!   └─▶ cache hit? ──▶ { text, cached: true }
//!         └─▶ providers[0] ─✗─▶ providers[1] ─✗─▶ … ─✗─▶ last error
//!               └─▶ sanitize_output ─▶ cache (response TTL) ─▶ { text, cached: false }
//! ```
//!
//! `stream_thought` bypasses both cache and chain: it talks to the single
//! streaming provider and sanitises each token before handing it out.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::provider::{build_provider, http_client, CompletionRequest, ProviderError, TextProvider};
use super::stream::{parse_event, LineDecoder, StreamEvent};
use crate::cache::AssistantCache;
use crate::config::{AppConfig, BrainConfig};
use crate::error::AssistantError;
use crate::security::SecurityGuard;

/// Per-call overrides of the configured generation parameters.
#[derive(Debug, Clone, Default)]
pub struct ThinkOptions {
    /// Serialised into the system prompt and the cache key.
    pub context: Option<Value>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThinkResponse {
    pub text: String,
    /// Whitespace word count; zero for cached responses.
    pub tokens: usize,
    pub cached: bool,
}

pub struct Brain {
    providers: Vec<Arc<dyn TextProvider>>,
    streaming: Option<Arc<dyn TextProvider>>,
    guard: Arc<dyn SecurityGuard>,
    cache: Arc<AssistantCache>,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
    response_ttl: Duration,
}

impl Brain {
    pub fn new(
        providers: Vec<Arc<dyn TextProvider>>,
        streaming: Option<Arc<dyn TextProvider>>,
        guard: Arc<dyn SecurityGuard>,
        cache: Arc<AssistantCache>,
        config: &BrainConfig,
        response_ttl: Duration,
    ) -> Self {
        Self {
            providers,
            streaming,
            guard,
            cache,
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_ttl,
        }
    }

    /// Build HTTP providers in configured order; the streaming provider is
    /// the one named by `brain.streaming_provider`.
    pub fn from_config(
        config: &AppConfig,
        guard: Arc<dyn SecurityGuard>,
        cache: Arc<AssistantCache>,
    ) -> Self {
        let client = http_client(config.brain.timeout());
        let mut streaming = None;
        let providers = config
            .brain
            .providers
            .iter()
            .map(|p| {
                let provider = build_provider(p, client.clone());
                if p.name == config.brain.streaming_provider {
                    streaming = Some(Arc::clone(&provider));
                }
                provider
            })
            .collect();

        if streaming.is_none() {
            log::warn!(
                "brain: streaming provider {:?} is not configured",
                config.brain.streaming_provider
            );
        }

        Self::new(
            providers,
            streaming,
            guard,
            cache,
            &config.brain,
            config.cache.response_ttl(),
        )
    }

    fn completion_request(&self, input: &str, options: &ThinkOptions) -> CompletionRequest {
        let context = options
            .context
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "{}".into());
        CompletionRequest {
            prompt: input.to_string(),
            system_prompt: format!("{} Context: {context}", self.system_prompt),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
        }
    }

    async fn validate(&self, input: &str) -> Result<(), AssistantError> {
        let verdict = self.guard.validate_input(input).await;
        if verdict.is_valid {
            return Ok(());
        }
        Err(AssistantError::validation(
            verdict.error.unwrap_or_else(|| "Invalid input".into()),
        ))
    }

    // -----------------------------------------------------------------------
    // think
    // -----------------------------------------------------------------------

    pub async fn think(&self, input: &str, options: &ThinkOptions) -> Result<ThinkResponse, AssistantError> {
        self.validate(input).await?;

        let context = options.context.as_ref();
        if let Some(text) = self.cache.get_ai_response(input, context) {
            log::debug!("brain: cache hit");
            return Ok(ThinkResponse {
                text,
                tokens: 0,
                cached: true,
            });
        }

        let request = self.completion_request(input, options);
        let raw = self.complete_with_fallback(&request).await?;

        let text = self.guard.sanitize_output(&raw).await;
        self.cache
            .set_ai_response(input, context, &text, self.response_ttl);

        let tokens = text.split_whitespace().count();
        log::info!("brain: answered with {tokens} words");
        Ok(ThinkResponse {
            text,
            tokens,
            cached: false,
        })
    }

    async fn complete_with_fallback(&self, request: &CompletionRequest) -> Result<String, AssistantError> {
        let mut last_error: Option<ProviderError> = None;

        for provider in &self.providers {
            match provider.complete(request).await {
                Ok(text) => {
                    log::debug!("brain: provider {} answered", provider.name());
                    return Ok(text);
                }
                Err(e) => {
                    log::warn!(
                        "brain: provider {} failed, trying next: {}",
                        provider.name(),
                        crate::error::scrub_message(&e.to_string())
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            // Exhaustion is terminal: the chain already moved past every
            // provider, so callers must not run it again.
            Some(e) => {
                log::error!("brain: all providers failed");
                Err(AssistantError::from(e).with_retryable(false))
            }
            None => Err(AssistantError::service_unavailable("No text providers configured")
                .with_retryable(false)),
        }
    }

    // -----------------------------------------------------------------------
    // stream_thought
    // -----------------------------------------------------------------------

    /// Stream a response from the streaming provider, calling `on_token`
    /// with each sanitised token.
    ///
    /// Returns the concatenated sanitised text.  Cancelling `cancel` ends
    /// the stream early without error.  Lines that fail to decode are
    /// logged and skipped; a transport failure aborts with an error.
    /// Streamed responses are never cached.
    pub async fn stream_thought<F>(
        &self,
        input: &str,
        options: &ThinkOptions,
        mut on_token: F,
        cancel: &CancellationToken,
    ) -> Result<String, AssistantError>
    where
        F: FnMut(&str) + Send,
    {
        self.validate(input).await?;

        let provider = self.streaming.as_ref().ok_or_else(|| {
            AssistantError::service_unavailable("No streaming provider configured")
                .with_retryable(false)
        })?;

        let request = self.completion_request(input, options);
        let mut body = tokio::select! {
            _ = cancel.cancelled() => return Ok(String::new()),
            body = provider.stream(&request) => body?,
        };

        let mut decoder = LineDecoder::new();
        let mut text = String::new();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("brain: stream cancelled by caller");
                    break 'read;
                }
                chunk = body.next() => chunk,
            };

            let (lines, finished) = match chunk {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) => return Err(e.into()),
                None => (decoder.finish().into_iter().collect(), true),
            };

            for line in lines {
                match parse_event(&line) {
                    Ok(StreamEvent::Token(token)) => {
                        let clean = self.guard.sanitize_output(&token).await;
                        on_token(&clean);
                        text.push_str(&clean);
                    }
                    Ok(StreamEvent::Done) => break 'read,
                    Ok(StreamEvent::Skip) => {}
                    Err(e) => log::warn!("brain: skipping undecodable stream line: {e}"),
                }
                if cancel.is_cancelled() {
                    break 'read;
                }
            }

            if finished {
                break;
            }
        }

        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
