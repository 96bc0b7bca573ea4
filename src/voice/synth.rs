//! Speech synthesis providers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

use crate::config::VoiceConfig;
use crate::error::AssistantError;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("synthesis request timed out")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("synthesis not configured: {0}")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

impl From<SynthesisError> for AssistantError {
    fn from(e: SynthesisError) -> Self {
        let message = e.to_string();
        let err = match &e {
            SynthesisError::Request(_) | SynthesisError::Timeout => AssistantError::network(message),
            SynthesisError::Api { status, .. } if *status == 429 || *status >= 500 => {
                AssistantError::service_unavailable(message)
            }
            SynthesisError::Api { .. } | SynthesisError::NotConfigured(_) => {
                AssistantError::unknown(message).with_retryable(false)
            }
        };
        err.with_cause(e)
    }
}

/// Delivery hints for one utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceParams {
    pub emotion: Option<String>,
    pub rate: Option<f32>,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Encoded audio (MP3 for ElevenLabs) for `text`.
    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Bytes, SynthesisError>;
}

// ---------------------------------------------------------------------------
// ElevenLabsSynthesizer
// ---------------------------------------------------------------------------

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    config: VoiceConfig,
}

impl ElevenLabsSynthesizer {
    pub fn from_config(config: &VoiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Bytes, SynthesisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(SynthesisError::NotConfigured("missing ElevenLabs API key"))?;
        let voice_id = self
            .config
            .voice_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(SynthesisError::NotConfigured("missing ElevenLabs voice id"))?;

        let url = format!(
            "{}/v1/text-to-speech/{voice_id}",
            self.config.base_url.trim_end_matches('/')
        );

        let payload = json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
                "style": 0.5,
                "use_speaker_boost": true,
                "speed": speed(params)
            }
        });

        log::debug!(
            "voice: synthesizing {} chars (emotion {:?}, rate {:?})",
            text.chars().count(),
            params.emotion,
            params.rate
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?)
    }
}

/// ElevenLabs accepts speeds between 0.7 and 1.2.
fn speed(params: &VoiceParams) -> f32 {
    let rate = params.rate.filter(|r| r.is_finite()).unwrap_or(1.0);
    rate.clamp(0.7, 1.2)
}
