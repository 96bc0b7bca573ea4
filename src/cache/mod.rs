//! Bounded, namespaced TTL cache for generated text and synthesized audio.

pub mod entry;
pub mod store;

pub use entry::{check_expiry, CacheEntry, EntryMetadata, Metadata, VoiceMetadata};
pub use store::{
    full_key, BoundedCache, CacheLimits, CacheStats, SetOptions, SweepHandle,
    AI_RESPONSE_NAMESPACE, VOICE_NAMESPACE,
};

use std::time::Duration;

use bytes::Bytes;

/// Values stored by the assistant: model replies and audio blobs share one
/// cache so they share the entry-count bound.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    Text(String),
    Audio(Bytes),
}

pub type AssistantCache = BoundedCache<CachedPayload>;

/// Cache key of a model reply: the input plus its serialised context.
pub fn ai_response_key(input: &str, context: Option<&serde_json::Value>) -> String {
    let context = context.map(|c| c.to_string()).unwrap_or_else(|| "{}".into());
    format!("{input}-{context}")
}

impl BoundedCache<CachedPayload> {
    /// Store a model reply under the response namespace.
    pub fn set_ai_response(
        &self,
        input: &str,
        context: Option<&serde_json::Value>,
        text: &str,
        ttl: Duration,
    ) {
        let metadata = Metadata::default().with(
            "context",
            context.map(|c| c.to_string()).unwrap_or_default(),
        );
        self.set(
            &ai_response_key(input, context),
            CachedPayload::Text(text.to_string()),
            SetOptions::new()
                .ttl(ttl)
                .namespace(AI_RESPONSE_NAMESPACE)
                .metadata(EntryMetadata::Generic(metadata)),
        );
    }

    /// Cached model reply for `input`, refreshing its recency.
    pub fn get_ai_response(
        &self,
        input: &str,
        context: Option<&serde_json::Value>,
    ) -> Option<String> {
        match self.get(
            &ai_response_key(input, context),
            Some(AI_RESPONSE_NAMESPACE),
            true,
        )? {
            CachedPayload::Text(text) => Some(text),
            CachedPayload::Audio(_) => None,
        }
    }

    /// Store synthesized audio for `text`; its length feeds the byte budget.
    pub fn set_voice_response(
        &self,
        text: &str,
        audio: Bytes,
        mut metadata: VoiceMetadata,
        ttl: Duration,
    ) {
        metadata.size_bytes = audio.len() as u64;
        self.set(
            text,
            CachedPayload::Audio(audio),
            SetOptions::new()
                .ttl(ttl)
                .namespace(VOICE_NAMESPACE)
                .metadata(EntryMetadata::Voice(metadata)),
        );
    }

    /// Cached audio for `text` with its metadata, refreshing its recency.
    pub fn get_voice_response(&self, text: &str) -> Option<(Bytes, VoiceMetadata)> {
        let (payload, metadata) = self.get_with_metadata(text, Some(VOICE_NAMESPACE), true)?;
        let CachedPayload::Audio(audio) = payload else {
            return None;
        };
        let metadata = match metadata {
            Some(EntryMetadata::Voice(v)) => v,
            _ => VoiceMetadata::sized(audio.len() as u64),
        };
        Some((audio, metadata))
    }
}
