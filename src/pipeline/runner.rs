//! Orchestrator: turns recognised commands into navigation, actions and
//! spoken answers.
//!
//! # Flow
//!
//! ```text
//! CommandResult (mpsc)
//!   ├─ WAKE        → speak greeting
//!   ├─ NAVIGATE    → publish destination, speak confirmation
//!   ├─ <action>    → publish action, speak its response
//!   └─ unmatched   → rate limit → TaskQueue → Brain::think → speak reply
//!                      └─ Err → record error, speak generic error response
//! ```
//!
//! Each command runs in its own task so a newer reply interrupts an older
//! one through the voice's playback channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::brain::{Brain, ThinkOptions, ThinkResponse};
use crate::config::{AppConfig, ResponsesConfig};
use crate::error::AssistantError;
use crate::queue::TaskQueue;
use crate::recognition::{CommandResult, NAVIGATE_ACTION, WAKE_ACTION};
use crate::security::RateLimiter;
use crate::voice::{Voice, VoiceParams};

use super::state::{update, SharedState};

/// Rate-limit key of voice queries; there is a single local speaker.
const VOICE_SESSION_KEY: &str = "voice-session";

// ---------------------------------------------------------------------------
// AssistantEvent
// ---------------------------------------------------------------------------

/// Outward notifications for a front end (router, status bar, log).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    Navigate { destination: String },
    Action { action: String },
    Reply { text: String, cached: bool },
    Failed { code: String, message: String },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    state: SharedState,
    brain: Arc<Brain>,
    voice: Arc<Voice>,
    queue: TaskQueue,
    limiter: Arc<RateLimiter>,
    responses: ResponsesConfig,
    route_unmatched: bool,
    think_priority: i32,
    speech_rate: f32,
    events: broadcast::Sender<AssistantEvent>,
}

impl Orchestrator {
    pub fn new(
        state: SharedState,
        brain: Arc<Brain>,
        voice: Arc<Voice>,
        queue: TaskQueue,
        limiter: Arc<RateLimiter>,
        config: &AppConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                state,
                brain,
                voice,
                queue,
                limiter,
                responses: config.responses.clone(),
                route_unmatched: config.commands.route_unmatched_to_brain,
                think_priority: config.queue.think_priority,
                speech_rate: config.voice.rate,
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.inner.state)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Handle commands until `commands` closes, then wait for the ones
    /// still in flight.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<CommandResult>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = commands.recv() => match received {
                    Some(result) => {
                        let this = self.clone();
                        in_flight.spawn(async move { this.handle(result).await });
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("pipeline: command task failed: {e}");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                log::error!("pipeline: command task failed: {e}");
            }
        }
        log::info!("pipeline: command channel closed, orchestrator shutting down");
    }

    /// Resolve one command to completion, including its speech.
    pub async fn handle(&self, result: CommandResult) {
        if result.success {
            update(&self.inner.state, |st| st.last_error = None);
        }

        if result.is_action(WAKE_ACTION) {
            let greeting = result
                .response
                .unwrap_or_else(|| self.inner.responses.greeting.clone());
            self.say(&greeting).await;
            return;
        }

        if result.is_action(NAVIGATE_ACTION) {
            let Some(destination) = result.response else {
                log::warn!("pipeline: navigation without a destination");
                return;
            };
            update(&self.inner.state, |st| {
                st.last_navigation = Some(destination.clone())
            });
            self.publish(AssistantEvent::Navigate {
                destination: destination.clone(),
            });
            self.say(&format!("Navigating to {destination}...")).await;
            return;
        }

        if result.success {
            if let Some(action) = &result.action {
                update(&self.inner.state, |st| st.last_action = Some(action.clone()));
                self.publish(AssistantEvent::Action {
                    action: action.clone(),
                });
            }
            if let Some(response) = &result.response {
                self.say(response).await;
            }
            return;
        }

        match result.transcript.filter(|t| !t.trim().is_empty()) {
            Some(query) if self.inner.route_unmatched => self.answer(&query).await,
            _ => {
                let message = result
                    .error
                    .unwrap_or_else(|| self.inner.responses.error.clone());
                self.say(&self.inner.responses.error).await;
                self.record_error(message);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Send `query` to the brain through the rate limiter and task queue.
    pub async fn ask(&self, query: &str) -> Result<ThinkResponse, AssistantError> {
        self.inner.limiter.check_rate_limit(&VOICE_SESSION_KEY.to_string())?;

        let brain = Arc::clone(&self.inner.brain);
        let query = query.to_string();
        self.inner
            .queue
            .enqueue(
                move || {
                    let brain = Arc::clone(&brain);
                    let query = query.clone();
                    async move { brain.think(&query, &ThinkOptions::default()).await }
                },
                self.inner.think_priority,
                None,
            )
            .await
    }

    async fn answer(&self, query: &str) {
        log::info!("pipeline: routing query to brain");
        match self.ask(query).await {
            Ok(reply) => {
                update(&self.inner.state, |st| {
                    st.queries_answered += 1;
                    st.last_error = None;
                });
                self.publish(AssistantEvent::Reply {
                    text: reply.text.clone(),
                    cached: reply.cached,
                });
                self.say(&reply.text).await;
            }
            Err(e) => {
                log::warn!("pipeline: query failed: {e}");
                self.publish(AssistantEvent::Failed {
                    code: e.code.as_str().to_string(),
                    message: e.message.clone(),
                });
                self.say(&self.inner.responses.error).await;
                self.record_error(e.message);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Record `text` as the latest response and speak it.  Speech failures
    /// are logged and recorded, never retried.
    async fn say(&self, text: &str) {
        update(&self.inner.state, |st| st.last_response = Some(text.to_string()));

        let params = VoiceParams {
            emotion: Some("professional".into()),
            rate: Some(self.inner.speech_rate),
        };
        if let Err(e) = self.inner.voice.speak(text, &params).await {
            log::warn!("pipeline: speech failed: {e}");
            self.record_error(e.message);
        }
    }

    fn record_error(&self, message: String) {
        update(&self.inner.state, |st| st.last_error = Some(message));
    }

    fn publish(&self, event: AssistantEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
