//! The Pipeline Engine (§3, §4.2): a singleton graph of hook triggers and
//! scripts, compiled into per-hook layered execution plans and dispatched
//! through the Sandbox Runtime.

pub mod engine;
pub mod graph;
pub mod hooks;
pub mod trace;

pub use engine::{DispatchOutcome, InMemoryScriptStore, PipelineEngine, ScriptStore};
pub use graph::{ExecutionPlan, GraphNode, PipelineCompileError, PipelineGraph, PipelineScript};
pub use hooks::{ExecutionMode, HookRegistry};
pub use trace::{Span, SpanStatus, Trace, TraceStatus, TraceStore};
