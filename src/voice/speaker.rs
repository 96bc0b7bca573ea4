//! `Voice`: cache-aware synthesis followed by playback.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::playback::{AudioOutput, PlaybackChannel};
use super::synth::{ElevenLabsSynthesizer, SpeechSynthesizer, VoiceParams};
use crate::cache::{AssistantCache, VoiceMetadata};
use crate::config::AppConfig;
use crate::error::AssistantError;

pub struct Voice {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: Arc<AssistantCache>,
    channel: PlaybackChannel,
    voice_ttl: Duration,
}

impl Voice {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        cache: Arc<AssistantCache>,
        volume: f32,
        voice_ttl: Duration,
    ) -> Self {
        Self {
            synthesizer,
            cache,
            channel: PlaybackChannel::new(output, volume),
            voice_ttl,
        }
    }

    /// ElevenLabs synthesis with the configured volume and audio TTL.
    pub fn from_config(
        config: &AppConfig,
        output: Arc<dyn AudioOutput>,
        cache: Arc<AssistantCache>,
    ) -> Self {
        Self::new(
            Arc::new(ElevenLabsSynthesizer::from_config(&config.voice)),
            output,
            cache,
            config.voice.volume,
            config.cache.voice_ttl(),
        )
    }

    /// Speak `text`, reusing cached audio when the same text was spoken
    /// before.  Any utterance in progress is interrupted.
    pub async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), AssistantError> {
        let audio = self.audio_for(text, params).await?;
        self.channel.play(audio).await?;
        Ok(())
    }

    async fn audio_for(&self, text: &str, params: &VoiceParams) -> Result<Bytes, AssistantError> {
        if let Some((audio, _)) = self.cache.get_voice_response(text) {
            log::debug!("voice: cache hit ({} bytes)", audio.len());
            return Ok(audio);
        }

        let audio = self.synthesizer.synthesize(text, params).await?;
        let metadata = VoiceMetadata {
            emotion: params.emotion.clone(),
            rate: params.rate,
            ..VoiceMetadata::sized(audio.len() as u64)
        };
        self.cache
            .set_voice_response(text, audio.clone(), metadata, self.voice_ttl);
        Ok(audio)
    }

    pub fn stop(&self) {
        self.channel.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.channel.is_playing()
    }

    pub fn set_volume(&self, volume: f32) {
        self.channel.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.channel.volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BoundedCache, CacheLimits};
    use crate::voice::playback::tests::RecordingOutput;
    use crate::voice::synth::SynthesisError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSynth {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSynth {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynth {
        async fn synthesize(&self, text: &str, _: &VoiceParams) -> Result<Bytes, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SynthesisError::Api {
                    status: 503,
                    message: "overloaded".into(),
                });
            }
            Ok(Bytes::from(format!("audio:{text}")))
        }
    }

    fn cache() -> Arc<AssistantCache> {
        Arc::new(BoundedCache::new(CacheLimits {
            default_ttl: Duration::from_secs(60),
            max_entries: 10,
            max_voice_bytes: 10_000,
        }))
    }

    #[tokio::test]
    async fn repeated_text_is_synthesized_once() {
        let synth = CountingSynth::new(false);
        let output = Arc::new(RecordingOutput::default());
        let cache = cache();
        let voice = Voice::new(
            synth.clone(),
            output.clone(),
            Arc::clone(&cache),
            0.8,
            Duration::from_secs(60),
        );

        let params = VoiceParams {
            emotion: Some("calm".into()),
            rate: Some(1.1),
        };
        voice.speak("Hello", &params).await.unwrap();
        voice.speak("Hello", &params).await.unwrap();

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.played.lock().unwrap().len(), 2);

        let (audio, metadata) = cache.get_voice_response("Hello").unwrap();
        assert_eq!(&audio[..], b"audio:Hello");
        assert_eq!(metadata.size_bytes, audio.len() as u64);
        assert_eq!(metadata.emotion.as_deref(), Some("calm"));
        assert_eq!(cache.voice_bytes(), audio.len() as u64);
    }

    #[tokio::test]
    async fn synthesis_failure_is_reported_and_not_cached() {
        let output = Arc::new(RecordingOutput::default());
        let cache = cache();
        let voice = Voice::new(
            CountingSynth::new(true),
            output.clone(),
            Arc::clone(&cache),
            0.8,
            Duration::from_secs(60),
        );

        let err = voice.speak("Hello", &VoiceParams::default()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.get_voice_response("Hello").is_none());
        assert!(output.played.lock().unwrap().is_empty());
        assert!(!voice.is_playing());
    }

    #[tokio::test]
    async fn playback_failure_clears_the_active_utterance() {
        let output = Arc::new(RecordingOutput {
            fail: true,
            ..Default::default()
        });
        let voice = Voice::new(
            CountingSynth::new(false),
            output,
            cache(),
            0.8,
            Duration::from_secs(60),
        );

        let err = voice.speak("Hello", &VoiceParams::default()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(!voice.is_playing());
    }
}
