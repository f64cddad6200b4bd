//! End-to-end dispatch through the public `pipeline` surface: two triggers on
//! independent hooks, one blocking and one async, dispatched through the same
//! engine and checked against the trace store it exposes.

use std::sync::Arc;
use std::time::Duration;

use authgraph::pipeline::{
    DispatchOutcome, ExecutionMode, InMemoryScriptStore, PipelineEngine, PipelineGraph,
    PipelineScript, TraceStatus,
};
use chrono::Utc;
use serde_json::json;

fn script(id: &str, code: &str) -> PipelineScript {
    PipelineScript {
        id: id.to_string(),
        name: id.to_string(),
        code: code.to_string(),
        config: None,
        updated_at: Utc::now(),
    }
}

fn engine_with(graph: PipelineGraph, scripts: Vec<PipelineScript>) -> PipelineEngine {
    let store = Arc::new(InMemoryScriptStore::new());
    for s in scripts {
        store.upsert(s);
    }
    let engine = PipelineEngine::new(graph, store);
    engine.compile_all().unwrap();
    engine
}

#[tokio::test]
async fn blocking_hook_denies_and_async_hook_schedules_on_the_same_engine() {
    let mut graph = PipelineGraph::default();
    graph.add_trigger("signin_guard", "before_signin", ExecutionMode::Blocking);
    graph.add_script("deny_if_locked");
    graph.add_edge("signin_guard", "deny_if_locked");

    graph.add_trigger("audit_log", "post_signin", ExecutionMode::Async);
    graph.add_script("record_login");
    graph.add_edge("audit_log", "record_login");

    let engine = engine_with(
        graph,
        vec![
            script("deny_if_locked", "return {allowed = context.locked ~= true}"),
            script("record_login", "return {recorded = true}"),
        ],
    );

    let denied = engine
        .dispatch("before_signin", json!({"locked": true}), Some("user_1".to_string()))
        .await;
    let DispatchOutcome::Denied { trace_id, .. } = denied else {
        panic!("expected the signin guard to deny a locked account");
    };
    assert_eq!(
        engine.traces().get(&trace_id).unwrap().status,
        TraceStatus::Denied
    );

    let allowed = engine
        .dispatch("before_signin", json!({"locked": false}), Some("user_2".to_string()))
        .await;
    assert!(matches!(allowed, DispatchOutcome::Allowed { .. }));

    let scheduled = engine
        .dispatch("post_signin", json!({"user": "user_2"}), Some("user_2".to_string()))
        .await;
    let DispatchOutcome::Scheduled { trace_id } = scheduled else {
        panic!("expected the async hook to schedule rather than block");
    };

    // The background task runs detached; give it a moment to close the trace.
    for _ in 0..20 {
        if let Some(trace) = engine.traces().get(&trace_id) {
            if trace.status != TraceStatus::Running {
                assert_eq!(trace.status, TraceStatus::Succeeded);
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("async hook never closed its trace");
}
