//! Assistant orchestration: shared state plus the loop that resolves
//! recognised commands into navigation, actions and spoken answers.
//!
//! # Architecture
//!
//! ```text
//! RecognitionService ──CommandResult (mpsc)──▶ Orchestrator::run()
//!        │                                        ├─ RateLimiter
//!        │                                        ├─ TaskQueue ─▶ Brain::think
//!        │                                        └─ Voice::speak
//!        └─ RecognitionState (watch) ─▶ mirror_recognition ─▶ SharedState
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{AssistantEvent, Orchestrator};
pub use state::{mirror_recognition, new_shared_state, AssistantState, SharedState};
