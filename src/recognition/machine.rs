//! Wake-word and command-window state machine.
//!
//! [`RecognitionMachine`] is pure: every input (`start`, `stop`, recognizer
//! events, timer expiries) returns the list of [`Effect`]s the driver must
//! carry out.  It never sleeps, spawns or reads the clock itself, so each
//! transition can be tested with hand-picked instants.
//!
//! ```text
//!  Idle ──start──▶ Listening ──wake phrase──▶ WaitingForCommand
//!   ▲                 ▲  ▲                         │
//!   │                 │  └── command / window ─────┘
//!   └──── stop ───────┘
//!                     └── not-allowed ──▶ Disabled
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::commands::{CommandResult, CommandTable};
use super::source::{RecognizerError, RecognizerErrorCode, RecognizerEvent, TranscriptResult};
use crate::config::{RecognitionConfig, ResponsesConfig};

// ---------------------------------------------------------------------------
// Phase / RecognitionState / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    WaitingForCommand,
    /// Permission refused; no automatic restarts until an explicit start.
    Disabled,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Listening => "Listening",
            Phase::WaitingForCommand => "Waiting for command",
            Phase::Disabled => "Disabled",
        }
    }

    fn is_enabled(&self) -> bool {
        matches!(self, Phase::Listening | Phase::WaitingForCommand)
    }
}

/// Snapshot pushed to subscribers on every recognizer event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecognitionState {
    pub is_listening: bool,
    pub is_processing: bool,
    pub transcript: String,
    pub error: Option<String>,
}

impl RecognitionState {
    fn listening() -> Self {
        Self {
            is_listening: true,
            ..Self::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Work requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(RecognitionState),
    Command(CommandResult),
    /// (Re)arm the command-window timer; replaces any armed one.
    ArmCommandTimer(Duration),
    CancelCommandTimer,
    StartRecognizer,
    StopRecognizer,
    /// Call [`RecognitionMachine::on_restart_due`] after the delay.
    ScheduleRestart(Duration),
    CancelRestart,
}

// ---------------------------------------------------------------------------
// RecognitionMachine
// ---------------------------------------------------------------------------

pub struct RecognitionMachine {
    config: RecognitionConfig,
    commands: CommandTable,
    responses: ResponsesConfig,
    wake_phrases: Vec<String>,

    phase: Phase,
    buffer: String,
    last_wake_at: Option<Instant>,
    restart_count: u32,
    restart_scheduled: bool,
    /// The engine ended mid-command; restart once the window closes.
    restart_deferred: bool,
}

impl RecognitionMachine {
    pub fn new(config: RecognitionConfig, commands: CommandTable, responses: ResponsesConfig) -> Self {
        let wake_phrases = config.wake_phrases();
        Self {
            config,
            commands,
            responses,
            wake_phrases,
            phase: Phase::Idle,
            buffer: String::new(),
            last_wake_at: None,
            restart_count: 0,
            restart_scheduled: false,
            restart_deferred: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Fragments buffered in the open command window.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    pub fn start(&mut self) -> Vec<Effect> {
        if self.phase.is_enabled() {
            return Vec::new();
        }
        log::info!("recognition: start");
        self.phase = Phase::Listening;
        self.restart_count = 0;
        self.restart_scheduled = false;
        self.restart_deferred = false;
        vec![Effect::StartRecognizer]
    }

    pub fn stop(&mut self) -> Vec<Effect> {
        if self.phase == Phase::Idle {
            return Vec::new();
        }
        log::info!("recognition: stop");
        self.phase = Phase::Idle;
        self.buffer.clear();
        self.restart_scheduled = false;
        self.restart_deferred = false;
        vec![
            Effect::CancelCommandTimer,
            Effect::CancelRestart,
            Effect::StopRecognizer,
            Effect::Publish(RecognitionState::default()),
        ]
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn handle(&mut self, event: RecognizerEvent, now: Instant) -> Vec<Effect> {
        match event {
            RecognizerEvent::Started => self.on_started(),
            RecognizerEvent::Result(results) => self.on_results(&results, now),
            RecognizerEvent::End => self.on_end(),
            RecognizerEvent::Error(code) => self.on_error(code),
        }
    }

    fn on_started(&mut self) -> Vec<Effect> {
        if !self.phase.is_enabled() {
            return Vec::new();
        }
        vec![Effect::Publish(RecognitionState::listening())]
    }

    fn on_results(&mut self, results: &[TranscriptResult], now: Instant) -> Vec<Effect> {
        if !self.phase.is_enabled() {
            return Vec::new();
        }

        let mut final_text = String::new();
        let mut interim_text = String::new();
        for result in results {
            if result.is_final {
                final_text.push_str(result.best());
            } else {
                interim_text.push_str(result.best());
            }
        }

        let shown = if final_text.is_empty() {
            &interim_text
        } else {
            &final_text
        };
        let mut effects = vec![Effect::Publish(RecognitionState {
            is_listening: true,
            is_processing: true,
            transcript: shown.to_lowercase(),
            error: None,
        })];

        if !final_text.is_empty() {
            self.restart_count = 0;
            effects.extend(self.process_transcript(&final_text.to_lowercase(), now));
        }
        effects
    }

    fn process_transcript(&mut self, transcript: &str, now: Instant) -> Vec<Effect> {
        match self.phase {
            Phase::Listening => {
                let cooled_down = self
                    .last_wake_at
                    .map_or(true, |at| now.duration_since(at) > self.config.wake_word_cooldown());
                let woken = self.wake_phrases.iter().any(|p| transcript.contains(p.as_str()));
                if !woken || !cooled_down {
                    return Vec::new();
                }

                log::info!("recognition: wake phrase detected");
                self.last_wake_at = Some(now);
                self.phase = Phase::WaitingForCommand;
                self.buffer.clear();
                vec![
                    Effect::ArmCommandTimer(self.config.command_window()),
                    Effect::Command(CommandResult::wake(&self.responses.greeting)),
                ]
            }
            Phase::WaitingForCommand => {
                self.buffer.push(' ');
                self.buffer.push_str(transcript);

                if self.commands.is_complete(&self.buffer) {
                    let command = self.commands.dispatch(self.buffer.trim());
                    let mut effects = vec![Effect::CancelCommandTimer, Effect::Command(command)];
                    effects.extend(self.close_window());
                    effects
                } else {
                    vec![Effect::ArmCommandTimer(self.config.command_window())]
                }
            }
            Phase::Idle | Phase::Disabled => Vec::new(),
        }
    }

    fn on_end(&mut self) -> Vec<Effect> {
        if !self.phase.is_enabled() {
            return Vec::new();
        }
        let mut effects = vec![Effect::Publish(RecognitionState::default())];
        effects.extend(self.request_restart(self.config.restart_delay()));
        effects
    }

    fn on_error(&mut self, code: RecognizerErrorCode) -> Vec<Effect> {
        if !self.phase.is_enabled() {
            return Vec::new();
        }

        let message = format!("Recognition error: {code}");
        let mut effects = Vec::new();

        match code {
            RecognizerErrorCode::NotAllowed => {
                log::warn!("recognition: microphone permission denied, disabling");
                self.phase = Phase::Disabled;
                self.buffer.clear();
                self.restart_scheduled = false;
                self.restart_deferred = false;
                effects.extend([
                    Effect::CancelCommandTimer,
                    Effect::CancelRestart,
                    Effect::StopRecognizer,
                    Effect::Publish(RecognitionState::failed(&self.responses.no_permission)),
                ]);
            }
            RecognizerErrorCode::NoSpeech => {
                effects.push(Effect::Publish(RecognitionState::failed(message)));
                if self.phase == Phase::WaitingForCommand {
                    log::debug!("recognition: no speech, closing command window");
                    effects.push(Effect::CancelCommandTimer);
                    effects.extend(self.close_window());
                }
            }
            RecognizerErrorCode::Network => {
                log::warn!("recognition: network error");
                effects.push(Effect::Publish(RecognitionState::failed(message)));
                effects.extend(self.request_restart(self.config.network_restart_delay()));
            }
            RecognizerErrorCode::Aborted | RecognizerErrorCode::Other(_) => {
                log::warn!("recognition: {message}");
                effects.push(Effect::Publish(RecognitionState::failed(message)));
                effects.extend(self.request_restart(self.config.restart_delay()));
            }
        }
        effects
    }

    // -----------------------------------------------------------------------
    // Timers / driver feedback
    // -----------------------------------------------------------------------

    /// The command window elapsed without a complete command.
    ///
    /// Whatever was buffered is dispatched best-effort; the session resets
    /// either way.
    pub fn on_command_timeout(&mut self) -> Vec<Effect> {
        if self.phase != Phase::WaitingForCommand {
            return Vec::new();
        }

        let mut effects = Vec::new();
        let buffered = self.buffer.trim();
        if !buffered.is_empty() {
            log::debug!("recognition: command window elapsed, dispatching buffer");
            effects.push(Effect::Command(self.commands.dispatch(buffered)));
        }
        effects.extend(self.close_window());
        effects
    }

    /// A scheduled restart is due.
    pub fn on_restart_due(&mut self) -> Vec<Effect> {
        self.restart_scheduled = false;
        if !self.phase.is_enabled() {
            return Vec::new();
        }
        log::debug!("recognition: restarting recognizer (attempt {})", self.restart_count);
        vec![Effect::StartRecognizer]
    }

    /// The driver failed to start the engine.
    pub fn on_start_failed(&mut self, err: &RecognizerError) -> Vec<Effect> {
        if !self.phase.is_enabled() {
            return Vec::new();
        }
        log::warn!("recognition: {err}");

        if matches!(err, RecognizerError::SourceClosed) {
            self.phase = Phase::Idle;
            self.buffer.clear();
            return vec![
                Effect::CancelCommandTimer,
                Effect::CancelRestart,
                Effect::Publish(RecognitionState::failed(err.to_string())),
            ];
        }

        let mut effects = vec![Effect::Publish(RecognitionState::failed(err.to_string()))];
        effects.extend(self.request_restart(self.config.restart_delay()));
        effects
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn close_window(&mut self) -> Vec<Effect> {
        self.phase = Phase::Listening;
        self.buffer.clear();
        if std::mem::take(&mut self.restart_deferred) {
            self.request_restart(self.config.restart_delay())
        } else {
            Vec::new()
        }
    }

    /// Bounded restart: defers while a command window is open, gives up
    /// after `max_restarts` consecutive attempts.
    fn request_restart(&mut self, delay: Duration) -> Vec<Effect> {
        if self.restart_scheduled {
            return Vec::new();
        }
        if self.phase == Phase::WaitingForCommand {
            self.restart_deferred = true;
            return Vec::new();
        }
        if self.restart_count >= self.config.max_restarts {
            log::error!(
                "recognition: giving up after {} consecutive restarts",
                self.restart_count
            );
            self.phase = Phase::Idle;
            return vec![
                Effect::CancelCommandTimer,
                Effect::Publish(RecognitionState::failed(format!(
                    "Speech recognition stopped after {} restarts",
                    self.restart_count
                ))),
            ];
        }

        self.restart_count += 1;
        self.restart_scheduled = true;
        vec![Effect::ScheduleRestart(delay)]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> RecognitionMachine {
        RecognitionMachine::new(
            RecognitionConfig::default(),
            CommandTable::default(),
            ResponsesConfig::default(),
        )
    }

    fn said(text: &str) -> RecognizerEvent {
        RecognizerEvent::Result(vec![TranscriptResult::final_text(text)])
    }

    fn commands(effects: &[Effect]) -> Vec<CommandResult> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn listening() -> (RecognitionMachine, Instant) {
        let mut m = machine();
        assert_eq!(m.start(), vec![Effect::StartRecognizer]);
        let t0 = Instant::now();
        m.handle(RecognizerEvent::Started, t0);
        (m, t0)
    }

    #[test]
    fn wake_then_command_dispatches_action() {
        let (mut m, t0) = listening();

        let effects = m.handle(said("okay hey abby"), t0);
        assert_eq!(commands(&effects), vec![CommandResult::wake("How can I help?")]);
        assert!(effects.contains(&Effect::ArmCommandTimer(Duration::from_secs(2))));
        assert_eq!(m.phase(), Phase::WaitingForCommand);

        let effects = m.handle(said("show high risk patients"), t0 + Duration::from_secs(1));
        let dispatched = commands(&effects);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].action.as_deref(), Some("SHOW_HIGH_RISK"));
        assert!(effects.contains(&Effect::CancelCommandTimer));
        assert_eq!(m.phase(), Phase::Listening);
    }

    #[test]
    fn alternate_spelling_also_wakes() {
        let (mut m, t0) = listening();
        let effects = m.handle(said("Hey Abbey"), t0);
        assert_eq!(commands(&effects), vec![CommandResult::wake("How can I help?")]);
        assert_eq!(m.phase(), Phase::WaitingForCommand);
    }

    #[test]
    fn configured_phrases_replace_the_defaults() {
        let mut config = RecognitionConfig::default();
        config.set_wake_phrases(&["ok nurse".into()]);
        let mut m = RecognitionMachine::new(config, CommandTable::default(), ResponsesConfig::default());
        m.start();
        let t0 = Instant::now();
        m.handle(RecognizerEvent::Started, t0);

        assert!(commands(&m.handle(said("hey abby"), t0)).is_empty());
        assert_eq!(commands(&m.handle(said("ok nurse"), t0)).len(), 1);
    }

    #[test]
    fn late_utterance_after_window_is_ignored() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);

        // The driver's 2s window fires before the utterance at 2.5s.
        let effects = m.on_command_timeout();
        assert!(commands(&effects).is_empty());
        assert_eq!(m.phase(), Phase::Listening);

        let effects = m.handle(said("show high risk patients"), t0 + Duration::from_millis(2500));
        assert!(commands(&effects).is_empty());
    }

    #[test]
    fn interim_results_never_drive_commands() {
        let (mut m, t0) = listening();
        let effects = m.handle(
            RecognizerEvent::Result(vec![TranscriptResult::interim_text("Hey Abby")]),
            t0,
        );
        assert!(commands(&effects).is_empty());
        assert_eq!(
            effects,
            vec![Effect::Publish(RecognitionState {
                is_listening: true,
                is_processing: true,
                transcript: "hey abby".into(),
                error: None,
            })]
        );
    }

    #[test]
    fn wake_word_respects_cooldown() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);
        m.on_command_timeout();

        let effects = m.handle(said("hey abby"), t0 + Duration::from_millis(1500));
        assert!(commands(&effects).is_empty());
        assert_eq!(m.phase(), Phase::Listening);

        let effects = m.handle(said("hey abby"), t0 + Duration::from_millis(2500));
        assert_eq!(commands(&effects).len(), 1);
    }

    #[test]
    fn fragments_accumulate_and_rearm_window() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);

        let effects = m.handle(said("show"), t0 + Duration::from_millis(500));
        assert_eq!(effects.last(), Some(&Effect::ArmCommandTimer(Duration::from_secs(2))));
        assert_eq!(m.buffer(), " show");

        let effects = m.handle(said("patients"), t0 + Duration::from_millis(900));
        assert_eq!(commands(&effects), vec![CommandResult::navigate("/patients")]);
    }

    #[test]
    fn window_timeout_dispatches_buffer_best_effort() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);
        m.handle(said("what is the weather"), t0 + Duration::from_millis(500));

        let effects = m.on_command_timeout();
        let dispatched = commands(&effects);
        assert_eq!(dispatched.len(), 1);
        assert!(!dispatched[0].success);
        assert_eq!(dispatched[0].transcript.as_deref(), Some("what is the weather"));
        assert_eq!(m.phase(), Phase::Listening);
    }

    #[test]
    fn end_restarts_up_to_cap_then_surfaces_error() {
        let (mut m, _) = listening();

        for _ in 0..3 {
            let effects = m.handle(RecognizerEvent::End, Instant::now());
            assert!(effects.contains(&Effect::ScheduleRestart(Duration::from_secs(1))));
            assert_eq!(m.on_restart_due(), vec![Effect::StartRecognizer]);
        }

        let effects = m.handle(RecognizerEvent::End, Instant::now());
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleRestart(_))));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Publish(RecognitionState { error: Some(_), .. })
        )));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn final_result_resets_restart_budget() {
        let (mut m, t0) = listening();
        for _ in 0..3 {
            m.handle(RecognizerEvent::End, t0);
            m.on_restart_due();
        }
        m.handle(said("just chatting"), t0);

        let effects = m.handle(RecognizerEvent::End, t0);
        assert!(effects.contains(&Effect::ScheduleRestart(Duration::from_secs(1))));
    }

    #[test]
    fn end_mid_command_defers_restart_until_window_closes() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);

        let effects = m.handle(RecognizerEvent::End, t0);
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleRestart(_))));

        let effects = m.on_command_timeout();
        assert!(effects.contains(&Effect::ScheduleRestart(Duration::from_secs(1))));
    }

    #[test]
    fn permission_denied_disables_without_restart() {
        let (mut m, t0) = listening();
        let effects = m.handle(RecognizerEvent::Error(RecognizerErrorCode::NotAllowed), t0);

        assert_eq!(m.phase(), Phase::Disabled);
        assert!(effects.contains(&Effect::Publish(RecognitionState::failed(
            ResponsesConfig::default().no_permission
        ))));
        assert!(m.handle(RecognizerEvent::End, t0).is_empty());
        assert!(m.on_restart_due().is_empty());
    }

    #[test]
    fn no_speech_closes_open_window() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);
        m.handle(said("show"), t0);

        let effects = m.handle(RecognizerEvent::Error(RecognizerErrorCode::NoSpeech), t0);
        assert!(effects.contains(&Effect::CancelCommandTimer));
        assert!(commands(&effects).is_empty());
        assert_eq!(m.phase(), Phase::Listening);
        assert_eq!(m.buffer(), "");
    }

    #[test]
    fn network_error_restarts_after_longer_delay_once() {
        let (mut m, t0) = listening();
        let effects = m.handle(RecognizerEvent::Error(RecognizerErrorCode::Network), t0);
        assert!(effects.contains(&Effect::ScheduleRestart(Duration::from_secs(5))));

        // The engine's trailing end event does not schedule a second restart.
        let effects = m.handle(RecognizerEvent::End, t0);
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleRestart(_))));
    }

    #[test]
    fn stop_cancels_everything() {
        let (mut m, t0) = listening();
        m.handle(said("hey abby"), t0);

        let effects = m.stop();
        assert_eq!(
            effects,
            vec![
                Effect::CancelCommandTimer,
                Effect::CancelRestart,
                Effect::StopRecognizer,
                Effect::Publish(RecognitionState::default()),
            ]
        );
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.on_command_timeout().is_empty());
        assert!(m.handle(said("hey abby"), t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn closed_source_stops_without_retry() {
        let (mut m, _) = listening();
        let effects = m.on_start_failed(&RecognizerError::SourceClosed);
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleRestart(_))));
        assert_eq!(m.phase(), Phase::Idle);
    }
}
