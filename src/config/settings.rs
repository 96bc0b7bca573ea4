//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every struct is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// RecognitionConfig
// ---------------------------------------------------------------------------

/// Wake-word and command-window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Phrase that opens a command window (matched case-insensitively).
    pub wake_phrase: String,
    /// Other spellings the recognizer may produce for the wake phrase.
    pub alternate_wake_phrases: Vec<String>,
    /// Minimum gap between two accepted wake words.
    pub wake_word_cooldown_ms: u64,
    /// Silence after which a buffered command is dispatched best-effort.
    pub command_window_ms: u64,
    /// Consecutive automatic restarts allowed before an error is surfaced.
    pub max_restarts: u32,
    /// Delay before restarting after an `end` event or a generic error.
    pub restart_delay_ms: u64,
    /// Delay before restarting after a network error.
    pub network_restart_delay_ms: u64,
    /// BCP-47 recognition language handed to the transcript source.
    pub language: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "hey abby".into(),
            alternate_wake_phrases: vec!["hey abbey".into()],
            wake_word_cooldown_ms: 2_000,
            command_window_ms: 2_000,
            max_restarts: 3,
            restart_delay_ms: 1_000,
            network_restart_delay_ms: 5_000,
            language: "en-US".into(),
        }
    }
}

impl RecognitionConfig {
    /// Every accepted wake phrase, lowercased, primary first.
    pub fn wake_phrases(&self) -> Vec<String> {
        std::iter::once(&self.wake_phrase)
            .chain(&self.alternate_wake_phrases)
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Replace the accepted wake phrases; the first becomes the primary one.
    /// An empty list leaves the configuration unchanged.
    pub fn set_wake_phrases(&mut self, phrases: &[String]) {
        if let Some((primary, rest)) = phrases.split_first() {
            self.wake_phrase = primary.clone();
            self.alternate_wake_phrases = rest.to_vec();
        }
    }

    pub fn wake_word_cooldown(&self) -> Duration {
        Duration::from_millis(self.wake_word_cooldown_ms)
    }

    pub fn command_window(&self) -> Duration {
        Duration::from_millis(self.command_window_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn network_restart_delay(&self) -> Duration {
        Duration::from_millis(self.network_restart_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// CommandsConfig
// ---------------------------------------------------------------------------

/// A spoken phrase that navigates to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationCommand {
    pub phrase: String,
    pub destination: String,
}

/// A spoken phrase that triggers a named action with a canned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub phrase: String,
    pub action: String,
    pub response: String,
}

/// Static command tables.  Declaration order is match order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Send commands that match no table entry to the brain as a free-form
    /// query instead of answering with the generic error response.
    pub route_unmatched_to_brain: bool,
    pub navigation: Vec<NavigationCommand>,
    pub actions: Vec<ActionCommand>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let nav = |phrase: &str, destination: &str| NavigationCommand {
            phrase: phrase.into(),
            destination: destination.into(),
        };
        let act = |phrase: &str, action: &str, response: &str| ActionCommand {
            phrase: phrase.into(),
            action: action.into(),
            response: response.into(),
        };

        Self {
            route_unmatched_to_brain: true,
            navigation: vec![
                nav("show patients", "/patients"),
                nav("open dashboard", "/dashboard"),
                nav("show care gaps", "/care-lists"),
                nav("show measures", "/measures"),
            ],
            actions: vec![
                act(
                    "high risk patients",
                    "SHOW_HIGH_RISK",
                    "Here are your high-risk patients...",
                ),
                act(
                    "care gaps summary",
                    "SHOW_CARE_GAPS",
                    "Displaying care gaps summary...",
                ),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// ResponsesConfig
// ---------------------------------------------------------------------------

/// Canned spoken/displayed responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsesConfig {
    pub greeting: String,
    pub processing: String,
    pub error: String,
    pub no_permission: String,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            greeting: "How can I help?".into(),
            processing: "Let me check that for you...".into(),
            error: "I'm sorry, I couldn't understand that. Could you please try again?".into(),
            no_permission: "I'll need microphone access to help you with voice commands."
                .into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Bounded cache limits and lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one.
    pub default_ttl_secs: u64,
    /// Upper bound on the number of live entries across all namespaces.
    pub max_entries: usize,
    /// TTL of cached text-generation responses.
    pub response_ttl_secs: u64,
    /// TTL of cached synthesized audio.
    pub voice_ttl_secs: u64,
    /// Byte budget of the `voice` namespace.
    pub max_voice_cache_bytes: u64,
    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600,
            max_entries: 1_000,
            response_ttl_secs: 3_600,
            voice_ttl_secs: 24 * 3_600,
            max_voice_cache_bytes: 100 * 1024 * 1024,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn voice_ttl(&self) -> Duration {
        Duration::from_secs(self.voice_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Task queue retry and timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Total attempts per task, including the first.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n × retry_base_delay_ms` before retrying.
    pub retry_base_delay_ms: u64,
    /// Deadline applied when a task is enqueued without one.
    pub default_task_timeout_ms: u64,
    /// Priority given to text-generation requests.
    pub think_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            default_task_timeout_ms: 30_000,
            think_priority: 5,
        }
    }
}

impl QueueConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_millis(self.default_task_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// BrainConfig
// ---------------------------------------------------------------------------

/// Wire protocol spoken by a text-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Anthropic Messages API (`/v1/messages`).
    Anthropic,
    /// Any OpenAI-compatible `/v1/chat/completions` endpoint (OpenAI,
    /// OpenRouter, Ollama, LM Studio …).
    OpenAiCompatible,
}

/// One entry of the provider fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Short identifier used in logs and for env-var key overrides.
    pub name: String,
    pub kind: ProviderKind,
    /// API root, e.g. `https://api.openai.com`.
    pub base_url: String,
    pub model: String,
    /// `None` for local providers that need no authentication.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sent as `HTTP-Referer` (OpenRouter attribution).
    #[serde(default)]
    pub referer: Option<String>,
}

/// Text-generation settings.  `providers` order is fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Name of the provider used by `stream_thought`.
    pub streaming_provider: String,
    pub providers: Vec<ProviderConfig>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are Abby, an AI healthcare assistant. You help doctors with \
their daily tasks and provide insights about patient care. You are knowledgeable about \
medical terminology, procedures, and best practices. You are professional, empathetic, and \
focused on improving patient outcomes. You must protect patient privacy and never disclose \
PHI inappropriately."
                .into(),
            max_tokens: 2_000,
            temperature: 0.7,
            timeout_secs: 30,
            streaming_provider: "openai".into(),
            providers: vec![
                ProviderConfig {
                    name: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    model: "claude-3-5-sonnet-latest".into(),
                    api_key: None,
                    referer: None,
                },
                ProviderConfig {
                    name: "openai".into(),
                    kind: ProviderKind::OpenAiCompatible,
                    base_url: "https://api.openai.com".into(),
                    model: "gpt-4o".into(),
                    api_key: None,
                    referer: None,
                },
                ProviderConfig {
                    name: "openrouter".into(),
                    kind: ProviderKind::OpenAiCompatible,
                    base_url: "https://openrouter.ai/api".into(),
                    model: "anthropic/claude-3.5-sonnet".into(),
                    api_key: None,
                    referer: Some("https://github.com/population-health-platform".into()),
                },
            ],
        }
    }
}

impl BrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Speech synthesis (ElevenLabs) and playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Output volume, clamped to `0.0 – 1.0` by the playback channel.
    pub volume: f32,
    /// Speaking rate; 1.0 is normal speed.
    pub rate: f32,
    pub timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".into(),
            api_key: None,
            voice_id: None,
            model: "eleven_monolingual_v1".into(),
            stability: 0.5,
            similarity_boost: 0.75,
            volume: 0.8,
            rate: 1.0,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// SecurityConfig
// ---------------------------------------------------------------------------

/// Input limits for the default security guard and the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Longest accepted query (roughly 4 characters per token × 2 000 tokens).
    pub max_input_chars: usize,
    /// Brain queries allowed per key per minute.
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 8_000,
            rate_limit_per_minute: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_assistant::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub recognition: RecognitionConfig,
    pub commands: CommandsConfig,
    pub responses: ResponsesConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub brain: BrainConfig,
    pub voice: VoiceConfig,
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario).
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay secrets from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay secrets from an arbitrary lookup.
    ///
    /// Provider keys come from `{NAME}_API_KEY` (name upper-cased, every
    /// non-alphanumeric character replaced by `_`); the synthesis voice from
    /// `ELEVENLABS_API_KEY` / `ELEVENLABS_VOICE_ID`.  Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for provider in &mut self.brain.providers {
            if let Some(key) = non_empty(&provider_env_key(&provider.name)) {
                provider.api_key = Some(key);
            }
        }
        if let Some(key) = non_empty("ELEVENLABS_API_KEY") {
            self.voice.api_key = Some(key);
        }
        if let Some(voice) = non_empty("ELEVENLABS_VOICE_ID") {
            self.voice.voice_id = Some(voice);
        }
    }
}

/// Environment variable consulted for a provider's API key.
fn provider_env_key(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}_API_KEY")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
