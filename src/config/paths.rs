//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings + preferences):
//!   Windows: %APPDATA%\voice-assistant\
//!   macOS:   ~/Library/Application Support/voice-assistant/
//!   Linux:   ~/.config/voice-assistant/
//!
//! Data dir (spooled audio):
//!   Windows: %LOCALAPPDATA%\voice-assistant\
//!   macOS:   ~/Library/Application Support/voice-assistant/
//!   Linux:   ~/.local/share/voice-assistant/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and `preferences.json`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to `preferences.json`.
    pub preferences_file: PathBuf,
    /// Directory the CLI spools synthesized utterances into.
    pub audio_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-assistant";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let preferences_file = config_dir.join("preferences.json");
        let audio_dir = data_dir.join("audio");

        Self {
            config_dir,
            settings_file,
            preferences_file,
            audio_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.audio_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths
            .preferences_file
            .file_name()
            .is_some_and(|n| n == "preferences.json"));
    }
}
