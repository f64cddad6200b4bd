//! Pipeline dispatch (§4.2): compiles the graph into per-hook execution
//! plans and runs them at request time, honoring blocking/async/enrichment
//! mode semantics and the layer happens-before barrier.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::instrument;

use super::graph::{ExecutionPlan, PipelineCompileError, PipelineGraph, PipelineScript};
use super::hooks::ExecutionMode;
use super::trace::{Span, SpanStatus, Trace, TraceStatus, TraceStore};
use crate::config::AppConfig;
use crate::event_bus::{Event, EventEmitter};
use crate::ids::IdGenerator;
use crate::metrics::Metrics;
use crate::sandbox::{Helpers, SandboxPool, compile};

/// Read access to stored pipeline scripts, keyed by id.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<PipelineScript>;
}

/// In-memory script store, the default backend.
#[derive(Default, Clone)]
pub struct InMemoryScriptStore {
    scripts: Arc<RwLock<FxHashMap<String, PipelineScript>>>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, script: PipelineScript) {
        self.scripts.write().insert(script.id.clone(), script);
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn get(&self, id: &str) -> Option<PipelineScript> {
        self.scripts.read().get(id).cloned()
    }
}

/// Outcome of one hook dispatch.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The trigger's plan ran to completion (or there was no plan for the
    /// hook at all) without any layer denying.
    Allowed { context: Value, trace_id: String },
    /// A blocking-mode script returned `{allowed = false, ...}`.
    Denied {
        reason: Option<Value>,
        trace_id: String,
    },
    /// A script errored in blocking mode, or the plan failed to compile.
    Error { trace_id: String },
    /// An async-mode hook was scheduled; the caller does not wait for it.
    Scheduled { trace_id: String },
}

pub struct PipelineEngine {
    graph: PipelineGraph,
    plans: RwLock<FxHashMap<String, ExecutionPlan>>,
    scripts: Arc<dyn ScriptStore>,
    sandbox: SandboxPool,
    helpers: Arc<dyn Helpers>,
    config: AppConfig,
    metrics: Metrics,
    traces: TraceStore,
    emitter: Option<Arc<dyn EventEmitter>>,
    ids: IdGenerator,
}

impl PipelineEngine {
    pub fn new(graph: PipelineGraph, scripts: Arc<dyn ScriptStore>) -> Self {
        Self {
            graph,
            plans: RwLock::new(FxHashMap::default()),
            scripts,
            sandbox: SandboxPool::new(crate::sandbox::PoolConfig::default()),
            helpers: Arc::new(crate::sandbox::DefaultHelpers),
            config: AppConfig::default(),
            metrics: Metrics::null(),
            traces: TraceStore::new(),
            emitter: None,
            ids: IdGenerator::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn traces(&self) -> &TraceStore {
        &self.traces
    }

    /// Compiles every trigger's execution plan, persisting the result atomically
    /// per hook (§4.2 "Persist the plan atomically per hook").
    pub fn compile_all(&self) -> Result<(), PipelineCompileError> {
        let mut compiled = FxHashMap::default();
        for node in &self.graph.nodes {
            if let super::graph::GraphNode::Trigger { id, hook, .. } = node {
                let plan = self.graph.compile_plan(id, self.config.max_chain_depth)?;
                compiled.insert(hook.clone(), plan);
            }
        }
        *self.plans.write() = compiled;
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            let _ = emitter.emit(event);
        }
    }

    /// Dispatches `hook` with `context`. Async-mode hooks return
    /// [`DispatchOutcome::Scheduled`] immediately; blocking/enrichment hooks
    /// run to completion before returning.
    #[instrument(skip(self, context))]
    pub async fn dispatch(&self, hook: &str, context: Value, user_id: Option<String>) -> DispatchOutcome {
        let trace_id = self.ids.generate_trace_id();
        let plan = match self.plans.read().get(hook).cloned() {
            Some(plan) => plan,
            None => {
                // No trigger registered for this hook: nothing to run.
                let mut trace = Trace::open(trace_id.clone(), hook.to_string(), context.clone(), user_id);
                trace.close(TraceStatus::Succeeded, None);
                self.traces.insert(trace);
                return DispatchOutcome::Allowed { context, trace_id };
            }
        };

        if plan.mode == ExecutionMode::Async {
            let trace = Trace::open(trace_id.clone(), hook.to_string(), context.clone(), user_id.clone());
            self.traces.insert(trace);
            let engine = self.clone_for_background();
            let hook = hook.to_string();
            let trace_id_bg = trace_id.clone();
            tokio::spawn(async move {
                engine.run_plan(&plan, context, &trace_id_bg, &hook).await;
            });
            return DispatchOutcome::Scheduled { trace_id };
        }

        let trace = Trace::open(trace_id.clone(), hook.to_string(), context.clone(), user_id);
        self.traces.insert(trace);
        self.run_plan(&plan, context, &trace_id, hook).await
    }

    fn clone_for_background(&self) -> Arc<PipelineEngineBackground> {
        Arc::new(PipelineEngineBackground {
            scripts: Arc::clone(&self.scripts),
            sandbox: self.sandbox.clone(),
            helpers: Arc::clone(&self.helpers),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            traces: self.traces.clone(),
            emitter: self.emitter.clone(),
            ids: self.ids,
        })
    }

    async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        context: Value,
        trace_id: &str,
        hook: &str,
    ) -> DispatchOutcome {
        let background = self.clone_for_background();
        background.run_plan(plan, context, trace_id, hook).await
    }
}

/// Everything `run_plan` needs, cloned out so an async-mode dispatch can run
/// detached from the borrow of `&self` inside `tokio::spawn`.
#[derive(Clone)]
struct PipelineEngineBackground {
    scripts: Arc<dyn ScriptStore>,
    sandbox: SandboxPool,
    helpers: Arc<dyn Helpers>,
    config: AppConfig,
    metrics: Metrics,
    traces: TraceStore,
    emitter: Option<Arc<dyn EventEmitter>>,
    ids: IdGenerator,
}

impl PipelineEngineBackground {
    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            let _ = emitter.emit(event);
        }
    }

    async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        mut context: Value,
        trace_id: &str,
        hook: &str,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let mut spans: Vec<Span> = Vec::new();

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            self.emit(Event::trace(trace_id, "pipeline.layer", format!("layer {layer_index} started")));

            let results = join_all(layer.iter().enumerate().map(|(parallel_index, script_id)| {
                let context = context.clone();
                let script_id = script_id.clone();
                async move {
                    let script = self.scripts.get(&script_id).await;
                    let span_id = self.ids.generate_span_id();
                    match script {
                        None => (
                            span_id,
                            script_id,
                            parallel_index,
                            None,
                            Some("script not found".to_string()),
                        ),
                        Some(script) => {
                            let compiled = compile(&script.code, self.config.max_script_size_bytes);
                            match compiled {
                                Ok(compiled) => {
                                    let report = crate::sandbox::execute(
                                        &compiled,
                                        context,
                                        &self.sandbox,
                                        Arc::clone(&self.helpers),
                                        &self.config,
                                    )
                                    .await;
                                    (
                                        span_id,
                                        script_id,
                                        parallel_index,
                                        report.result,
                                        report.diagnostic.map(|d| d.to_string()),
                                    )
                                }
                                Err(err) => (span_id, script_id, parallel_index, None, Some(err.to_string())),
                            }
                        }
                    }
                }
            }))
            .await;

            let mut layer_denied: Option<Value> = None;
            let mut layer_errored = false;
            let mut enrichment_updates: Vec<Value> = Vec::new();

            for (span_id, script_id, parallel_index, result, error) in results {
                let status = match (&result, &error) {
                    (Some(value), _) if plan.mode == ExecutionMode::Blocking => {
                        if value.get("allowed") == Some(&Value::Bool(false)) {
                            layer_denied = Some(value.clone());
                            SpanStatus::Denied
                        } else {
                            SpanStatus::Succeeded
                        }
                    }
                    (Some(_), _) => SpanStatus::Succeeded,
                    (None, _) => SpanStatus::Errored,
                };

                if status == SpanStatus::Errored && plan.mode == ExecutionMode::Blocking {
                    layer_errored = true;
                }

                if let Some(value) = &result {
                    if plan.mode == ExecutionMode::Enrichment {
                        enrichment_updates.push(value.clone());
                    }
                }

                if let Some(err) = &error {
                    self.emit(Event::span(
                        trace_id,
                        &span_id,
                        "pipeline.script.error",
                        format!("script {script_id} failed: {err}"),
                    ));
                }

                spans.push(Span {
                    id: span_id,
                    trace_id: trace_id.to_string(),
                    parent_span_id: None,
                    script_id,
                    layer_index,
                    parallel_index,
                    status,
                    attributes: result.unwrap_or(Value::Null),
                });
            }

            // Enrichment: shallow-merge successful returns into context for
            // layers that follow.
            if plan.mode == ExecutionMode::Enrichment {
                if let Value::Object(ref mut map) = context {
                    for update in enrichment_updates {
                        if let Value::Object(fields) = update {
                            for (k, v) in fields {
                                map.insert(k, v);
                            }
                        }
                    }
                } else if let Some(first) = enrichment_updates.into_iter().next() {
                    context = first;
                }
            }

            if plan.mode == ExecutionMode::Blocking && layer_errored {
                let mut trace = self.traces.get(trace_id).unwrap_or_else(|| {
                    Trace::open(trace_id.to_string(), hook.to_string(), context.clone(), None)
                });
                trace.spans = spans;
                trace.close(TraceStatus::Errored, None);
                self.metrics.count("pipeline.dispatch.count", &[("outcome", "error")]);
                self.traces.update(trace);
                return DispatchOutcome::Error {
                    trace_id: trace_id.to_string(),
                };
            }

            if plan.mode == ExecutionMode::Blocking {
                if let Some(reason) = layer_denied {
                    let mut trace = self.traces.get(trace_id).unwrap_or_else(|| {
                        Trace::open(trace_id.to_string(), hook.to_string(), context.clone(), None)
                    });
                    trace.spans = spans;
                    trace.close(TraceStatus::Denied, Some(reason.clone()));
                    self.metrics.count("pipeline.dispatch.count", &[("outcome", "denied")]);
                    self.traces.update(trace);
                    return DispatchOutcome::Denied {
                        reason: Some(reason),
                        trace_id: trace_id.to_string(),
                    };
                }
            }
        }

        let mut trace = self
            .traces
            .get(trace_id)
            .unwrap_or_else(|| Trace::open(trace_id.to_string(), hook.to_string(), context.clone(), None));
        trace.spans = spans;
        trace.close(TraceStatus::Succeeded, Some(context.clone()));
        self.traces.update(trace);

        self.metrics.duration_ms(
            "pipeline.dispatch.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            &[],
        );
        self.metrics.count("pipeline.dispatch.count", &[("outcome", "success")]);

        DispatchOutcome::Allowed {
            context,
            trace_id: trace_id.to_string(),
        }
    }
}
