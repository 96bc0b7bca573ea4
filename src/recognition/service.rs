//! Actor that drives a [`RecognitionMachine`] from recognizer events and
//! cancellable deadlines.
//!
//! The service task owns the machine, the engine and both timers (command
//! window, restart).  Deadlines are plain `Option<Instant>` fields raced in a
//! single `select!`, so clearing one on `stop()` or on a dispatched command
//! cancels it without any stale callback left behind.

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::commands::CommandResult;
use super::machine::{Effect, RecognitionMachine, RecognitionState};
use super::source::{RecognizerEvent, SpeechRecognizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
    Shutdown,
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// RecognitionHandle
// ---------------------------------------------------------------------------

/// Control surface of a spawned recognition service.
pub struct RecognitionHandle {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<RecognitionState>,
    task: JoinHandle<()>,
}

impl RecognitionHandle {
    pub fn start(&self) {
        let _ = self.control.send(Control::Start);
    }

    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }

    /// Latest published state.
    pub fn state(&self) -> RecognitionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published state.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.state.clone()
    }

    /// Stop recognition, cancel all timers and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.control.send(Control::Shutdown);
        if let Err(e) = self.task.await {
            log::warn!("recognition: service task ended abnormally: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// RecognitionService
// ---------------------------------------------------------------------------

pub struct RecognitionService<R> {
    machine: RecognitionMachine,
    recognizer: R,
    state_tx: watch::Sender<RecognitionState>,
    commands_tx: mpsc::UnboundedSender<CommandResult>,
    command_deadline: Option<Instant>,
    restart_deadline: Option<Instant>,
}

impl<R: SpeechRecognizer + 'static> RecognitionService<R> {
    /// Spawn the service on the tokio runtime.
    ///
    /// `events` must be the receiving end of the channel `recognizer` emits
    /// on.  Returns the control handle and the stream of command results.
    pub fn spawn(
        machine: RecognitionMachine,
        recognizer: R,
        events: mpsc::UnboundedReceiver<RecognizerEvent>,
    ) -> (RecognitionHandle, mpsc::UnboundedReceiver<CommandResult>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RecognitionState::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let service = Self {
            machine,
            recognizer,
            state_tx,
            commands_tx,
            command_deadline: None,
            restart_deadline: None,
        };
        let task = tokio::spawn(service.run(control_rx, events));

        (
            RecognitionHandle {
                control: control_tx,
                state: state_rx,
                task,
            },
            commands_rx,
        )
    }

    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut events: mpsc::UnboundedReceiver<RecognizerEvent>,
    ) {
        loop {
            let effects = tokio::select! {
                ctl = control.recv() => match ctl {
                    Some(Control::Start) => self.machine.start(),
                    Some(Control::Stop) => self.machine.stop(),
                    Some(Control::Shutdown) | None => {
                        let effects = self.machine.stop();
                        self.apply(effects);
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    log::trace!("recognition: event {event:?}");
                    self.machine.handle(event, Instant::now())
                }
                _ = sleep_until_opt(self.command_deadline) => {
                    self.command_deadline = None;
                    self.machine.on_command_timeout()
                }
                _ = sleep_until_opt(self.restart_deadline) => {
                    self.restart_deadline = None;
                    self.machine.on_restart_due()
                }
            };
            self.apply(effects);
        }

        self.command_deadline = None;
        self.restart_deadline = None;
        log::info!("recognition: service stopped");
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut pending: VecDeque<Effect> = effects.into();

        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Publish(state) => {
                    self.state_tx.send_replace(state);
                }
                Effect::Command(command) => {
                    if self.commands_tx.send(command).is_err() {
                        log::debug!("recognition: command receiver dropped");
                    }
                }
                Effect::ArmCommandTimer(window) => {
                    self.command_deadline = Some(Instant::now() + window);
                }
                Effect::CancelCommandTimer => self.command_deadline = None,
                Effect::ScheduleRestart(delay) => {
                    self.restart_deadline = Some(Instant::now() + delay);
                }
                Effect::CancelRestart => self.restart_deadline = None,
                Effect::StartRecognizer => {
                    if let Err(e) = self.recognizer.start() {
                        pending.extend(self.machine.on_start_failed(&e));
                    }
                }
                Effect::StopRecognizer => self.recognizer.stop(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RecognitionConfig, ResponsesConfig};
    use crate::recognition::{CommandTable, RecognizerError, TranscriptResult};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts starts and stops; events are injected by the test.
    struct ScriptedRecognizer {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
    }

    impl SpeechRecognizer for ScriptedRecognizer {
        fn start(&mut self) -> Result<(), RecognizerError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        handle: RecognitionHandle,
        commands: mpsc::UnboundedReceiver<CommandResult>,
        events: mpsc::UnboundedSender<RecognizerEvent>,
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
    }

    fn spawn() -> Harness {
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let recognizer = ScriptedRecognizer {
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        };
        let machine = RecognitionMachine::new(
            RecognitionConfig::default(),
            CommandTable::default(),
            ResponsesConfig::default(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, commands) = RecognitionService::spawn(machine, recognizer, events_rx);
        Harness {
            handle,
            commands,
            events: events_tx,
            starts,
            stops,
        }
    }

    fn said(text: &str) -> RecognizerEvent {
        RecognizerEvent::Result(vec![TranscriptResult::final_text(text)])
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wake_then_command_within_window() {
        let mut h = spawn();
        h.handle.start();
        h.events.send(RecognizerEvent::Started).unwrap();
        h.events.send(said("hey abby")).unwrap();

        let wake = h.commands.recv().await.unwrap();
        assert_eq!(wake.action.as_deref(), Some("WAKE"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.events.send(said("show high risk patients")).unwrap();

        let command = h.commands.recv().await.unwrap();
        assert_eq!(command.action.as_deref(), Some("SHOW_HIGH_RISK"));
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn utterance_after_window_dispatches_nothing() {
        let mut h = spawn();
        h.handle.start();
        h.events.send(RecognizerEvent::Started).unwrap();
        h.events.send(said("hey abby")).unwrap();
        assert!(h.commands.recv().await.unwrap().is_action("WAKE"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.events.send(said("show high risk patients")).unwrap();
        settle().await;

        assert!(h.commands.try_recv().is_err());
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn end_event_restarts_recognizer_after_delay() {
        let h = spawn();
        h.handle.start();
        settle().await;
        assert_eq!(h.starts.load(Ordering::SeqCst), 1);

        h.events.send(RecognizerEvent::End).unwrap();
        settle().await;
        assert_eq!(h.starts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.starts.load(Ordering::SeqCst), 2);
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_restart() {
        let h = spawn();
        h.handle.start();
        h.events.send(RecognizerEvent::End).unwrap();
        settle().await;

        h.handle.stop();
        settle().await;
        assert_eq!(h.stops.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.handle.state(), RecognitionState::default());
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_published_to_subscribers() {
        let h = spawn();
        let mut rx = h.handle.subscribe();
        h.handle.start();
        h.events.send(RecognizerEvent::Started).unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_listening);
        h.handle.shutdown().await;
    }
}
