//! Core error taxonomy shared by the queue, the brain and the voice layer.
//!
//! Every failure that leaves the assistant core is an [`AssistantError`]
//! carrying a stable [`ErrorCode`], a scrubbed human-readable message and a
//! `retryable` flag that drives [`with_retry`](crate::queue::with_retry).
//!
//! Messages are passed through [`scrub_message`] at construction time so no
//! email address, card number, numeric ID or API key can reach a log line or
//! the UI.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Stable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Input rejected before any side effect.
    ValidationError,
    /// Caller exceeded its request budget and must back off.
    RateLimitExceeded,
    /// Transport-level failure (connect, reset, timeout).
    NetworkError,
    /// Upstream answered with a failure status.
    ServiceUnavailable,
    /// A queued task did not finish before its deadline.
    TaskTimeout,
    /// Catch-all.
    Unknown,
}

impl ErrorCode {
    /// Wire string used in logs and serialised state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::TaskTimeout => "TASK_TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Retryability applied when an error is built without an explicit flag.
    ///
    /// ```
    /// use voice_assistant::error::ErrorCode;
    ///
    /// assert!(!ErrorCode::ValidationError.default_retryable());
    /// assert!(!ErrorCode::RateLimitExceeded.default_retryable());
    /// assert!(ErrorCode::NetworkError.default_retryable());
    /// assert!(ErrorCode::Unknown.default_retryable());
    /// ```
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError | ErrorCode::ServiceUnavailable | ErrorCode::Unknown
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AssistantError
// ---------------------------------------------------------------------------

/// Shared, cloneable underlying cause.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync>;

/// Error surfaced by the assistant core.
///
/// Cheap to clone so the same failure can be delivered to a task handle and
/// recorded in the shared UI state.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AssistantError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl AssistantError {
    /// Build an error with the default retryability for `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: scrub_message(&message.into()),
            retryable: code.default_retryable(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimitExceeded, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TaskTimeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Override the retryability flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

// ---------------------------------------------------------------------------
// Message scrubbing
// ---------------------------------------------------------------------------

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9._-]+").expect("valid regex")
});

static CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").expect("valid regex"));

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4,}\b").expect("valid regex"));

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|token|secret)[=:]\s*['"]?[\w.\-]+['"]?"#).expect("valid regex")
});

/// Remove personal and secret material from an error message.
///
/// Card-like digit runs are replaced before shorter numeric IDs so a card
/// number collapses into a single `[CARD]` marker.
///
/// ```
/// use voice_assistant::error::scrub_message;
///
/// assert_eq!(
///     scrub_message("mail jane.doe@example.org about 55231"),
///     "mail [EMAIL] about [ID]"
/// );
/// assert_eq!(scrub_message("api_key=sk-abc123"), "api_key=[REDACTED]");
/// ```
pub fn scrub_message(message: &str) -> String {
    let out = EMAIL_RE.replace_all(message, "[EMAIL]");
    let out = CARD_RE.replace_all(&out, "[CARD]");
    let out = ID_RE.replace_all(&out, "[ID]");
    let out = SECRET_RE.replace_all(&out, "${1}=[REDACTED]");
    out.into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_have_stable_wire_strings() {
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::RateLimitExceeded.as_str(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(ErrorCode::NetworkError.as_str(), "NETWORK_ERROR");
        assert_eq!(ErrorCode::ServiceUnavailable.as_str(), "SERVICE_UNAVAILABLE");
        assert_eq!(ErrorCode::TaskTimeout.as_str(), "TASK_TIMEOUT");
        assert_eq!(ErrorCode::Unknown.as_str(), "UNKNOWN_ERROR");
    }

    #[test]
    fn constructors_apply_default_retryability() {
        assert!(!AssistantError::validation("bad").is_retryable());
        assert!(!AssistantError::rate_limited("slow down").is_retryable());
        assert!(!AssistantError::timeout("late").is_retryable());
        assert!(AssistantError::network("reset").is_retryable());
        assert!(AssistantError::service_unavailable("503").is_retryable());
        assert!(AssistantError::unknown("?").is_retryable());
    }

    #[test]
    fn with_retryable_overrides_default() {
        let err = AssistantError::unknown("boom").with_retryable(false);
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = AssistantError::validation("Input too long");
        assert_eq!(err.to_string(), "VALIDATION_ERROR: Input too long");
    }

    #[test]
    fn message_is_scrubbed_at_construction() {
        let err = AssistantError::network("connect to bob@clinic.io failed");
        assert_eq!(err.message, "connect to [EMAIL] failed");
    }

    #[test]
    fn scrub_replaces_card_numbers() {
        assert_eq!(
            scrub_message("card 4111 1111 1111 1111 declined"),
            "card [CARD] declined"
        );
    }

    #[test]
    fn scrub_replaces_tokens_case_insensitively() {
        assert_eq!(scrub_message("TOKEN: 'abc.def-1'"), "TOKEN=[REDACTED]");
        assert_eq!(scrub_message("secret=hunter2"), "secret=[REDACTED]");
    }

    #[test]
    fn scrub_leaves_short_numbers_alone() {
        assert_eq!(scrub_message("HTTP 503 from upstream"), "HTTP 503 from upstream");
    }

    #[test]
    fn cause_is_exposed_as_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = AssistantError::unknown("wrapped").with_cause(io);
        assert!(err.source().is_some());
    }
}
