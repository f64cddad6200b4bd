//! Chained, structured diagnostics that cross the sandbox boundary.
//!
//! Sandbox and policy evaluation failures need to preserve a root cause
//! without leaking a concrete error type across the script/host boundary.
//! [`LadderError`] is the same shape the rest of this crate's ancestry uses
//! for that: a human message, an optional boxed cause, and a free-form JSON
//! details bag, chained like rungs on a ladder back to the original failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chained error that can cross the sandbox/host boundary without losing
/// its cause chain to type erasure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderError {
    pub message: String,
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: Value,
}

impl LadderError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walks the cause chain to the deepest error's message.
    pub fn root_message(&self) -> &str {
        match &self.cause {
            Some(cause) => cause.root_message(),
            None => &self.message,
        }
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Scope a diagnostic was raised in, used to key audit/trace records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DiagnosticScope {
    Sandbox { script_id: String },
    Policy { permission: Option<String> },
    Pipeline { hook: String, layer: usize },
    Credential,
    Webhook { endpoint_id: String },
}

/// A single recorded diagnostic event: when, where, what, and any tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub when: DateTime<Utc>,
    pub scope: DiagnosticScope,
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Value,
}

impl DiagnosticEvent {
    pub fn new(scope: DiagnosticScope, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope,
            error,
            tags: Vec::new(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_message_walks_to_deepest_cause() {
        let err = LadderError::msg("sandbox execution failed")
            .with_cause(LadderError::msg("timeout after 1000ms"));
        assert_eq!(err.root_message(), "timeout after 1000ms");
    }

    #[test]
    fn diagnostic_event_serializes_scope_as_tagged_enum() {
        let event = DiagnosticEvent::new(
            DiagnosticScope::Sandbox {
                script_id: "scr_1".into(),
            },
            LadderError::msg("boom"),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["scope"]["scope"], "sandbox");
    }
}
