//! Continuous speech recognition: wake-word detection, command windows and
//! the restart policy around an external recognizer engine.
//!
//! * [`source`]  : engine contract ([`SpeechRecognizer`]) and event types.
//! * [`commands`]: navigation/action tables and [`CommandResult`].
//! * [`machine`] : pure `(state, event) -> effects` transitions.
//! * [`service`] : tokio task executing those effects.

pub mod commands;
pub mod machine;
pub mod service;
pub mod source;

pub use commands::{CommandResult, CommandTable, NAVIGATE_ACTION, WAKE_ACTION};
pub use machine::{Effect, Phase, RecognitionMachine, RecognitionState};
pub use service::{RecognitionHandle, RecognitionService};
pub use source::{
    Alternative, LineRecognizer, RecognizerError, RecognizerErrorCode, RecognizerEvent,
    SpeechRecognizer, TranscriptResult,
};
