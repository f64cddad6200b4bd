//! The structured event shape flowing through the [`super::EventBus`]: pipeline
//! trace/span lifecycle events and free-form diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::DiagnosticEvent;

/// A single observability event emitted by the pipeline or authorization
/// engines as they run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    /// A trace or span transitioned state (started, succeeded, denied, errored).
    Trace(TraceEvent),
    /// A standalone diagnostic not tied to a particular trace lifecycle edge.
    Diagnostic(DiagnosticEvent),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    pub span_id: Option<String>,
    pub scope: String,
    pub message: String,
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl Event {
    pub fn trace(
        trace_id: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Trace(TraceEvent {
            trace_id: trace_id.into(),
            span_id: None,
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
            metadata: Value::Null,
        })
    }

    pub fn span(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Trace(TraceEvent {
            trace_id: trace_id.into(),
            span_id: Some(span_id.into()),
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
            metadata: Value::Null,
        })
    }

    pub fn diagnostic(event: DiagnosticEvent) -> Self {
        Event::Diagnostic(event)
    }

    pub fn scope_label(&self) -> String {
        match self {
            Event::Trace(t) => t.scope.clone(),
            Event::Diagnostic(d) => format!("{:?}", d.scope),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Trace(t) => &t.message,
            Event::Diagnostic(d) => &d.error.message,
        }
    }

    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.scope_label(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_event_carries_scope_and_message() {
        let event = Event::trace("trace_1", "pipeline.dispatch", "layer 0 started");
        assert_eq!(event.scope_label(), "pipeline.dispatch");
        assert_eq!(event.message(), "layer 0 started");
    }
}
