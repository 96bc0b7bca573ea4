//! Transcript-source contract and a line-oriented implementation.
//!
//! A [`SpeechRecognizer`] is the engine side of recognition: it is started
//! and stopped by the recognition service and pushes [`RecognizerEvent`]s on
//! the channel it was built with.  Results carry interim and final
//! alternatives; lifecycle events (`Started`, `End`, `Error`) drive the
//! restart policy.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One recognition hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub text: String,
}

/// A recognised segment, interim or final.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub is_final: bool,
    pub alternatives: Vec<Alternative>,
}

impl TranscriptResult {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            alternatives: vec![Alternative { text: text.into() }],
        }
    }

    pub fn interim_text(text: impl Into<String>) -> Self {
        Self {
            is_final: false,
            alternatives: vec![Alternative { text: text.into() }],
        }
    }

    /// Text of the top alternative, empty when there is none.
    pub fn best(&self) -> &str {
        self.alternatives
            .first()
            .map(|a| a.text.as_str())
            .unwrap_or_default()
    }
}

/// Engine error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerErrorCode {
    /// Microphone permission refused.
    NotAllowed,
    NoSpeech,
    Network,
    Aborted,
    Other(String),
}

impl fmt::Display for RecognizerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerErrorCode::NotAllowed => f.write_str("not-allowed"),
            RecognizerErrorCode::NoSpeech => f.write_str("no-speech"),
            RecognizerErrorCode::Network => f.write_str("network"),
            RecognizerErrorCode::Aborted => f.write_str("aborted"),
            RecognizerErrorCode::Other(code) => f.write_str(code),
        }
    }
}

/// Everything a recognizer reports.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Started,
    Result(Vec<TranscriptResult>),
    End,
    Error(RecognizerErrorCode),
}

// ---------------------------------------------------------------------------
// SpeechRecognizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum RecognizerError {
    #[error("Recognizer already running")]
    AlreadyRunning,

    /// The underlying input is exhausted; the recognizer cannot restart.
    #[error("Transcript source closed")]
    SourceClosed,

    #[error("Recognizer failed to start: {0}")]
    Start(String),
}

/// Engine driven by the recognition service.
pub trait SpeechRecognizer: Send {
    /// Begin emitting events.  `Started` is reported on the event channel.
    fn start(&mut self) -> Result<(), RecognizerError>;

    /// Stop emitting results.  The engine reports `End` once stopped.
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// LineRecognizer
// ---------------------------------------------------------------------------

/// Treats each non-empty input line as a final transcript.
///
/// Used by the CLI with stdin.  Restarting resumes from the same reader;
/// once the input is exhausted the recognizer reports `End`, trips its
/// `closed` token and refuses further starts.
pub struct LineRecognizer<R> {
    lines: Arc<Mutex<Lines<R>>>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
    running: Option<CancellationToken>,
    closed: CancellationToken,
}

impl<R> LineRecognizer<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, events: mpsc::UnboundedSender<RecognizerEvent>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(reader.lines())),
            events,
            running: None,
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled when the input reaches end-of-file.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl<R> SpeechRecognizer for LineRecognizer<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn start(&mut self) -> Result<(), RecognizerError> {
        if self.closed.is_cancelled() {
            return Err(RecognizerError::SourceClosed);
        }
        if self.running.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(RecognizerError::AlreadyRunning);
        }

        let stop = CancellationToken::new();
        self.running = Some(stop.clone());

        let lines = Arc::clone(&self.lines);
        let events = self.events.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let _ = events.send(RecognizerEvent::Started);
            let mut lines = lines.lock().await;
            loop {
                let next = tokio::select! {
                    _ = stop.cancelled() => break,
                    next = lines.next_line() => next,
                };
                match next {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let result = vec![TranscriptResult::final_text(line)];
                        if events.send(RecognizerEvent::Result(result)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("recognition: transcript input closed");
                        closed.cancel();
                        break;
                    }
                    Err(e) => {
                        log::warn!("recognition: failed to read transcript line: {e}");
                        let _ = events.send(RecognizerEvent::Error(RecognizerErrorCode::Other(
                            "read-error".into(),
                        )));
                        break;
                    }
                }
            }
            stop.cancel();
            let _ = events.send(RecognizerEvent::End);
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.running.take() {
            stop.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn best_picks_first_alternative() {
        let result = TranscriptResult {
            is_final: true,
            alternatives: vec![
                Alternative { text: "show patients".into() },
                Alternative { text: "so patience".into() },
            ],
        };
        assert_eq!(result.best(), "show patients");
        assert_eq!(
            TranscriptResult { is_final: false, alternatives: vec![] }.best(),
            ""
        );
    }

    #[tokio::test]
    async fn lines_become_final_results_then_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = BufReader::new(&b"hey abby\n\n  show patients  \n"[..]);
        let mut recognizer = LineRecognizer::new(input, tx);
        let closed = recognizer.closed();

        recognizer.start().unwrap();

        assert_eq!(rx.recv().await, Some(RecognizerEvent::Started));
        assert_eq!(
            rx.recv().await,
            Some(RecognizerEvent::Result(vec![TranscriptResult::final_text("hey abby")]))
        );
        assert_eq!(
            rx.recv().await,
            Some(RecognizerEvent::Result(vec![TranscriptResult::final_text("show patients")]))
        );
        assert_eq!(rx.recv().await, Some(RecognizerEvent::End));
        assert!(closed.is_cancelled());

        assert!(matches!(recognizer.start(), Err(RecognizerError::SourceClosed)));
    }

    #[tokio::test]
    async fn stop_reports_end_without_closing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_writer, reader) = tokio::io::duplex(64);
        let mut recognizer = LineRecognizer::new(BufReader::new(reader), tx);

        recognizer.start().unwrap();
        assert_eq!(rx.recv().await, Some(RecognizerEvent::Started));

        recognizer.stop();
        assert_eq!(rx.recv().await, Some(RecognizerEvent::End));
        assert!(!recognizer.closed().is_cancelled());

        // A stopped recognizer can be started again.
        recognizer.start().unwrap();
        assert_eq!(rx.recv().await, Some(RecognizerEvent::Started));
    }
}
