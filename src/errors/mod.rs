//! Error taxonomy shared by every component.
//!
//! Mirrors the classify-at-the-boundary discipline of a structured error
//! code: every error arising inside the core is tagged with one of the
//! categories below before it crosses a component boundary, never leaked as
//! a raw driver/LLM/store exception. `CoreError::code()` gives the stable
//! string used in `StepResult.errorKind` and the HTTP `{code, message}` body;
//! `user_message()` gives text safe to show a caller (no internals, no stack
//! traces).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Driver,
    Llm,
    Store,
    Cancelled,
    Internal,
}

/// One error per leaf of the §7 taxonomy. Recovery policy lives with the
/// caller (Plan Executor, Selector Resolver, HTTP layer) — this enum only
/// classifies.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Locator was syntactically invalid or matched no visible element.
    #[error("locator error on '{target}': {message}")]
    DriverLocator { target: String, message: String },

    /// A driver operation exceeded its deadline.
    #[error("driver operation timed out after {timeout_ms}ms: {message}")]
    DriverTimeout { timeout_ms: u64, message: String },

    /// Navigation or request-level network failure.
    #[error("driver network error: {0}")]
    DriverNetwork(String),

    /// An assertion evaluated to false.
    #[error("assertion failed: expected {expected}, got {actual}")]
    DriverAssertion { expected: String, actual: String },

    /// Rate limit or 5xx from the LLM provider; bounded-retryable.
    #[error("llm transient error: {0}")]
    LlmTransient(String),

    /// LLM response did not parse into the expected schema.
    #[error("llm schema error: {0}")]
    LlmSchema(String),

    /// Vector store unavailable; callers treat this as non-fatal.
    #[error("store transient error: {0}")]
    StoreTransient(String),

    /// The operation's caller requested cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Anything else — surfaces as Run outcome `error`.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable tag used in `StepResult.errorKind` and the
    /// HTTP error body. Matches spec §7's taxonomy strings verbatim.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::DriverLocator { .. } => "driver.locator",
            CoreError::DriverTimeout { .. } => "driver.timeout",
            CoreError::DriverNetwork(_) => "driver.network",
            CoreError::DriverAssertion { .. } => "driver.assertion",
            CoreError::LlmTransient(_) => "llm.transient",
            CoreError::LlmSchema(_) => "llm.schema",
            CoreError::StoreTransient(_) => "store.transient",
            CoreError::Cancelled => "cancelled",
            CoreError::Internal(_) => "internal",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::DriverLocator { .. }
            | CoreError::DriverTimeout { .. }
            | CoreError::DriverNetwork(_)
            | CoreError::DriverAssertion { .. } => ErrorCategory::Driver,
            CoreError::LlmTransient(_) | CoreError::LlmSchema(_) => ErrorCategory::Llm,
            CoreError::StoreTransient(_) => ErrorCategory::Store,
            CoreError::Cancelled => ErrorCategory::Cancelled,
            CoreError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the Plan Executor's retry loop should treat this as
    /// retryable-without-auto-heal (§7 recovery column).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::DriverTimeout { .. } | CoreError::DriverNetwork(_)
        )
    }

    pub fn is_locator_error(&self) -> bool {
        matches!(self, CoreError::DriverLocator { .. })
    }

    /// Text safe to surface to an HTTP caller or a StepResult: no internal
    /// detail beyond what the taxonomy itself already reveals.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::DriverLocator { target, .. } => {
                format!("could not resolve locator '{target}'")
            }
            CoreError::DriverTimeout { timeout_ms, .. } => {
                format!("operation timed out after {timeout_ms}ms")
            }
            CoreError::DriverNetwork(_) => "navigation failed".to_string(),
            CoreError::DriverAssertion { expected, .. } => {
                format!("assertion failed: expected {expected}")
            }
            CoreError::LlmTransient(_) => "model provider temporarily unavailable".to_string(),
            CoreError::LlmSchema(_) => "model returned an unparsable response".to_string(),
            CoreError::StoreTransient(_) => "knowledge store temporarily unavailable".to_string(),
            CoreError::Cancelled => "cancelled".to_string(),
            CoreError::Internal(_) => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy_strings() {
        assert_eq!(
            CoreError::DriverLocator { target: "x".into(), message: "m".into() }.code(),
            "driver.locator"
        );
        assert_eq!(CoreError::Cancelled.code(), "cancelled");
        assert_eq!(CoreError::Internal("boom".into()).code(), "internal");
    }

    #[test]
    fn timeout_and_network_are_retryable_locator_is_not() {
        assert!(CoreError::DriverTimeout { timeout_ms: 10, message: "".into() }.is_retryable());
        assert!(CoreError::DriverNetwork("x".into()).is_retryable());
        assert!(!CoreError::DriverLocator { target: "x".into(), message: "".into() }.is_retryable());
    }

    #[test]
    fn user_message_hides_internals() {
        let err = CoreError::Internal("panic at foo.rs:42".into());
        assert_eq!(err.user_message(), "internal error");
    }
}
