//! Speech output: synthesis, caching of synthesized audio, and playback.

pub mod playback;
pub mod speaker;
pub mod synth;

pub use playback::{AudioOutput, PlaybackChannel, PlaybackError, SpoolOutput};
pub use speaker::Voice;
pub use synth::{ElevenLabsSynthesizer, SpeechSynthesizer, SynthesisError, VoiceParams};
