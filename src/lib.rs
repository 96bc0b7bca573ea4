//! Voice assistant core: continuous recognition with wake-word and command
//! windows, a prioritised task queue, a bounded TTL cache, a text-generation
//! fallback chain and cached speech synthesis.

pub mod brain;
pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prefs;
pub mod queue;
pub mod recognition;
pub mod security;
pub mod voice;
