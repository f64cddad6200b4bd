//! Traces and Spans (§3): the record of one hook dispatch and its per-script
//! children, plus cleanup of records older than a cutoff (§4.6 "Cleanup",
//! applied here to traces/spans rather than webhook deliveries).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Succeeded,
    Denied,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Succeeded,
    Denied,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub script_id: String,
    pub layer_index: usize,
    pub parallel_index: usize,
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub trigger_event: String,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub context_snapshot: Option<Value>,
    #[serde(default)]
    pub result_data: Option<Value>,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn open(id: String, trigger_event: String, context_snapshot: Value, user_id: Option<String>) -> Self {
        Self {
            id,
            trigger_event,
            status: TraceStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            user_id,
            context_snapshot: Some(context_snapshot),
            result_data: None,
            spans: Vec::new(),
        }
    }

    pub fn close(&mut self, status: TraceStatus, result_data: Option<Value>) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds() as f64);
        self.status = status;
        self.result_data = result_data;
    }
}

/// In-memory Trace store; durable deployments back this with a table keyed
/// the same way.
#[derive(Default, Clone)]
pub struct TraceStore {
    traces: Arc<RwLock<Vec<Trace>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trace: Trace) {
        self.traces.write().push(trace);
    }

    pub fn update(&self, trace: Trace) {
        let mut traces = self.traces.write();
        if let Some(existing) = traces.iter_mut().find(|t| t.id == trace.id) {
            *existing = trace;
        } else {
            traces.push(trace);
        }
    }

    pub fn get(&self, id: &str) -> Option<Trace> {
        self.traces.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Trace> {
        self.traces.read().clone()
    }

    /// Purges traces (and their spans) older than `cutoff`, as a batch.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut traces = self.traces.write();
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn close_computes_duration_and_status() {
        let mut trace = Trace::open("trace_1".into(), "before_signin".into(), json!({}), None);
        trace.close(TraceStatus::Succeeded, None);
        assert_eq!(trace.status, TraceStatus::Succeeded);
        assert!(trace.duration_ms.is_some());
    }

    #[test]
    fn purge_removes_only_traces_older_than_cutoff() {
        let store = TraceStore::new();
        let mut old = Trace::open("old".into(), "h".into(), json!({}), None);
        old.started_at = Utc::now() - Duration::days(10);
        store.insert(old);
        store.insert(Trace::open("new".into(), "h".into(), json!({}), None));

        let purged = store.purge_older_than(Utc::now() - Duration::days(1));
        assert_eq!(purged, 1);
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.all()[0].id, "new");
    }
}
