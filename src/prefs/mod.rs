//! Persisted user preferences.
//!
//! [`PreferenceStore`] keeps small JSON values under string keys in a single
//! file (`preferences.json` in the config directory).  Every
//! mutation is written through to disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;

/// Key under which [`VoicePreferences`] are stored.
pub const VOICE_PREFERENCES_KEY: &str = "voice";

// ---------------------------------------------------------------------------
// VoicePreferences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoicePreferences {
    pub enabled: bool,
    pub wake_words: Vec<String>,
    pub language: String,
    pub rate: f32,
    pub volume: f32,
}

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_words: vec!["hey abby".into(), "hey abbey".into()],
            language: "en-US".into(),
            rate: 1.0,
            volume: 1.0,
        }
    }
}

impl VoicePreferences {
    /// Overlay these preferences on the loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) {
        config.recognition.language = self.language.clone();
        config.recognition.set_wake_phrases(&self.wake_words);
        config.voice.volume = self.volume;
        config.voice.rate = self.rate;
    }
}

// ---------------------------------------------------------------------------
// PreferenceStore
// ---------------------------------------------------------------------------

pub struct PreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl PreferenceStore {
    /// Open the store at `path`.  A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value under `key`, or `None` when absent or of a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let value = values.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("prefs: ignoring malformed value under '{key}': {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).context("failed to serialize preference")?;
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    /// Remove `key`; returns whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&values)?;
        Ok(true)
    }

    pub fn voice_preferences(&self) -> VoicePreferences {
        self.get(VOICE_PREFERENCES_KEY).unwrap_or_default()
    }

    pub fn set_voice_preferences(&self, prefs: &VoicePreferences) -> Result<()> {
        self.set(VOICE_PREFERENCES_KEY, prefs)
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, data)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
