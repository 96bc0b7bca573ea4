//! Audio output and the single-utterance playback channel.
//!
//! [`PlaybackChannel`] owns at most one active utterance.  Starting a new one
//! cancels the previous; the active slot is released when the utterance
//! finishes, fails, is stopped, or its future is dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::AssistantError;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("cannot decode audio: {0}")]
    Decode(String),

    #[error("audio output failed: {0}")]
    Output(#[from] std::io::Error),
}

impl From<PlaybackError> for AssistantError {
    fn from(e: PlaybackError) -> Self {
        AssistantError::unknown(e.to_string())
            .with_retryable(false)
            .with_cause(e)
    }
}

/// Sink that renders one encoded clip to completion.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: &Bytes, volume: f32) -> Result<(), PlaybackError>;
}

// ---------------------------------------------------------------------------
// SpoolOutput
// ---------------------------------------------------------------------------

/// Writes each clip to `dir` as an MP3 file for an external player.
pub struct SpoolOutput {
    dir: PathBuf,
    counter: AtomicU64,
}

impl SpoolOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AudioOutput for SpoolOutput {
    async fn play(&self, audio: &Bytes, volume: f32) -> Result<(), PlaybackError> {
        if audio.is_empty() {
            return Err(PlaybackError::Decode("empty audio buffer".into()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("utterance-{n}.mp3"));
        tokio::fs::write(&path, audio).await?;

        log::info!(
            "voice: wrote {} bytes to {} (volume {volume:.2})",
            audio.len(),
            path.display()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PlaybackChannel
// ---------------------------------------------------------------------------

struct Active {
    generation: u64,
    cancel: CancellationToken,
}

pub struct PlaybackChannel {
    output: Arc<dyn AudioOutput>,
    volume: Mutex<f32>,
    active: Arc<Mutex<Option<Active>>>,
    generation: AtomicU64,
}

/// Releases the active slot if it still belongs to this utterance.
struct ActiveGuard {
    active: Arc<Mutex<Option<Active>>>,
    generation: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.active);
        if slot.as_ref().map(|a| a.generation) == Some(self.generation) {
            *slot = None;
        }
    }
}

fn lock_slot(active: &Mutex<Option<Active>>) -> MutexGuard<'_, Option<Active>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaybackChannel {
    pub fn new(output: Arc<dyn AudioOutput>, volume: f32) -> Self {
        Self {
            output,
            volume: Mutex::new(clamp_volume(volume)),
            active: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Play `audio`, interrupting whatever is playing.
    ///
    /// Resolves `Ok` when the clip finishes or is interrupted by a newer
    /// utterance or [`stop`](Self::stop).
    pub async fn play(&self, audio: Bytes) -> Result<(), PlaybackError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        {
            let mut slot = lock_slot(&self.active);
            if let Some(previous) = slot.take() {
                log::debug!("voice: interrupting utterance {}", previous.generation);
                previous.cancel.cancel();
            }
            *slot = Some(Active {
                generation,
                cancel: cancel.clone(),
            });
        }
        let _guard = ActiveGuard {
            active: Arc::clone(&self.active),
            generation,
        };

        let volume = self.volume();
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = self.output.play(&audio, volume) => {
                if let Err(e) = &result {
                    log::warn!("voice: playback failed: {e}");
                }
                result
            }
        }
    }

    /// Halt the active utterance, if any.
    pub fn stop(&self) {
        let mut slot = lock_slot(&self.active);
        if let Some(active) = slot.take() {
            active.cancel.cancel();
        }
    }

    pub fn is_playing(&self) -> bool {
        lock_slot(&self.active).is_some()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set output volume, clamped to `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = clamp_volume(volume);
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
