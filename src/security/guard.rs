//! Input validation and output sanitisation boundary.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::SecurityConfig;

/// Outcome of [`SecurityGuard::validate_input`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Capability consulted before any text reaches a provider and before any
/// provider output reaches the user.
///
/// Object-safe so it can be held as `Arc<dyn SecurityGuard>`.
#[async_trait]
pub trait SecurityGuard: Send + Sync {
    async fn validate_input(&self, text: &str) -> Validation;

    async fn sanitize_output(&self, text: &str) -> String;
}

// ---------------------------------------------------------------------------
// PatternGuard
// ---------------------------------------------------------------------------

static INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?ix)
        <\s*/?\s*script
        | javascript:
        | \bon\w+\s*=
        | data:text/html
        | ;\s*(drop|delete|update|insert)\s
        | \s(or|and)\s+\d+\s*=\s*\d+
        "#,
    )
    .expect("valid regex")
});

static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{2}[-.]?\d{4}\b").expect("valid regex"));

static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{10}\b").expect("valid regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("valid regex")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("valid regex"));

/// Regex-based guard: rejects empty, oversized and markup/SQL-injection
/// input; redacts identifiers from output.
#[derive(Debug, Clone)]
pub struct PatternGuard {
    max_input_chars: usize,
}

impl PatternGuard {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            max_input_chars: config.max_input_chars,
        }
    }

    fn check(&self, text: &str) -> Validation {
        if text.trim().is_empty() {
            return Validation::rejected("Input is empty");
        }
        if text.chars().count() > self.max_input_chars {
            return Validation::rejected("Input exceeds maximum allowed length");
        }
        if INJECTION_RE.is_match(text) {
            return Validation::rejected("Input contains disallowed content");
        }
        Validation::ok()
    }
}

impl Default for PatternGuard {
    fn default() -> Self {
        Self::new(&SecurityConfig::default())
    }
}

/// Replace identifiers with `[REDACTED-…]` markers.
///
/// ```
/// use voice_assistant::security::redact_identifiers;
///
/// assert_eq!(
///     redact_identifiers("call 555-123-4567 re 123-45-6789"),
///     "call [REDACTED-PHONE] re [REDACTED-SSN]"
/// );
/// ```
pub fn redact_identifiers(text: &str) -> String {
    let out = SSN_RE.replace_all(text, "[REDACTED-SSN]");
    let out = RECORD_RE.replace_all(&out, "[REDACTED-ID]");
    let out = EMAIL_RE.replace_all(&out, "[REDACTED-EMAIL]");
    let out = PHONE_RE.replace_all(&out, "[REDACTED-PHONE]");
    out.into_owned()
}

#[async_trait]
impl SecurityGuard for PatternGuard {
    async fn validate_input(&self, text: &str) -> Validation {
        let verdict = self.check(text);
        if let Some(error) = &verdict.error {
            log::warn!("security: input rejected: {error}");
        }
        verdict
    }

    async fn sanitize_output(&self, text: &str) -> String {
        redact_identifiers(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_ordinary_questions() {
        let guard = PatternGuard::default();
        let v = guard
            .validate_input("How many patients have open care gaps?")
            .await;
        assert_eq!(v, Validation::ok());
    }

    #[tokio::test]
    async fn rejects_empty_and_whitespace() {
        let guard = PatternGuard::default();
        assert!(!guard.validate_input("").await.is_valid);
        assert!(!guard.validate_input("   ").await.is_valid);
    }

    #[tokio::test]
    async fn rejects_oversized_input() {
        let guard = PatternGuard::new(&SecurityConfig {
            max_input_chars: 10,
            ..SecurityConfig::default()
        });
        let v = guard.validate_input("this is far too long").await;
        assert_eq!(
            v,
            Validation::rejected("Input exceeds maximum allowed length")
        );
        assert!(guard.validate_input("ten chars!").await.is_valid);
    }

    #[tokio::test]
    async fn rejects_injection_patterns() {
        let guard = PatternGuard::default();
        for text in [
            "<script>alert(1)</script>",
            "click javascript:void(0)",
            "img onerror=steal()",
            "name'; DROP TABLE patients",
            "id = 5 OR 1=1",
        ] {
            assert!(!guard.validate_input(text).await.is_valid, "{text}");
        }
    }

    #[tokio::test]
    async fn sanitize_redacts_identifiers() {
        let guard = PatternGuard::default();
        let out = guard
            .sanitize_output("MRN 1234567890, mail Jane.Doe@Clinic.org")
            .await;
        assert_eq!(out, "MRN [REDACTED-ID], mail [REDACTED-EMAIL]");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(
            redact_identifiers("You have 12 patients due."),
            "You have 12 patients due."
        );
    }
}
