//! Configuration module for the voice assistant.
//!
//! Provides `AppConfig` (top-level settings), one sub-config per subsystem,
//! `AppPaths` for cross-platform data directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    ActionCommand, AppConfig, BrainConfig, CacheConfig, CommandsConfig, NavigationCommand,
    ProviderConfig, ProviderKind, QueueConfig, RecognitionConfig, ResponsesConfig,
    SecurityConfig, VoiceConfig,
};
