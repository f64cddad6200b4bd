//! The Pipeline Graph and its compilation into per-hook [`ExecutionPlan`]s
//! (§3, §4.2).
//!
//! Compilation is BFS-then-Kahn's-algorithm: for a trigger node, first find
//! every script node reachable from it, then layer those scripts by
//! in-degree (restricted to the reachable subgraph, with edges out of the
//! trigger itself seeding layer zero rather than contributing in-degree).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hooks::ExecutionMode;

/// A stored, immutable-on-read pipeline script (§3). `updated_at` versions it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineScript {
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub config: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// A node in the pipeline graph: either a trigger pinning a hook and
/// execution mode, or a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphNode {
    Trigger {
        id: String,
        hook: String,
        mode: ExecutionMode,
    },
    Script {
        id: String,
    },
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Trigger { id, .. } => id,
            GraphNode::Script { id } => id,
        }
    }
}

/// The singleton pipeline graph: typed nodes and directed edges between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub nodes: Vec<GraphNode>,
    /// Directed edges as `(from_id, to_id)`.
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic, Clone, PartialEq, Eq)]
pub enum PipelineCompileError {
    #[error("trigger `{trigger_id}` not found in the pipeline graph")]
    #[diagnostic(code(authgraph::pipeline::trigger_not_found))]
    TriggerNotFound { trigger_id: String },

    #[error("cycle detected among scripts reachable from trigger `{trigger_id}`: {remaining:?}")]
    #[diagnostic(
        code(authgraph::pipeline::cycle_detected),
        help("break the cycle between the listed script ids before compiling")
    )]
    CycleDetected {
        trigger_id: String,
        remaining: Vec<String>,
    },

    #[error("execution plan for trigger `{trigger_id}` exceeds MAX_CHAIN_DEPTH ({max} layers)")]
    #[diagnostic(code(authgraph::pipeline::chain_too_deep))]
    ChainTooDeep { trigger_id: String, max: usize },
}

/// The compiled, layered execution plan for one trigger: an ordered list of
/// layers, each a set of script ids runnable in parallel (I3: a script
/// appears in exactly one layer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub hook: String,
    pub mode: ExecutionMode,
    pub layers: Vec<Vec<String>>,
}

impl PipelineGraph {
    pub fn add_trigger(&mut self, id: impl Into<String>, hook: impl Into<String>, mode: ExecutionMode) {
        self.nodes.push(GraphNode::Trigger {
            id: id.into(),
            hook: hook.into(),
            mode,
        });
    }

    pub fn add_script(&mut self, id: impl Into<String>) {
        self.nodes.push(GraphNode::Script { id: id.into() });
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.push((from.into(), to.into()));
    }

    fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    fn is_script(&self, id: &str) -> bool {
        matches!(self.node(id), Some(GraphNode::Script { .. }))
    }

    fn outgoing(&self, id: &str) -> impl Iterator<Item = &str> {
        self.edges
            .iter()
            .filter(move |(from, _)| from == id)
            .map(|(_, to)| to.as_str())
    }

    /// Compiles the execution plan for `trigger_id`, capped at
    /// `max_chain_depth` layers (`MAX_CHAIN_DEPTH` in the component design).
    pub fn compile_plan(
        &self,
        trigger_id: &str,
        max_chain_depth: usize,
    ) -> Result<ExecutionPlan, PipelineCompileError> {
        let Some(GraphNode::Trigger { hook, mode, .. }) = self.node(trigger_id) else {
            return Err(PipelineCompileError::TriggerNotFound {
                trigger_id: trigger_id.to_string(),
            });
        };
        let hook = hook.clone();
        let mode = *mode;

        // BFS from the trigger, retaining only script nodes.
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(trigger_id.to_string());
        let mut visited_any: HashSet<String> = HashSet::new();
        visited_any.insert(trigger_id.to_string());
        while let Some(current) = queue.pop_front() {
            for next in self.outgoing(&current) {
                if !visited_any.insert(next.to_string()) {
                    continue;
                }
                if self.is_script(next) {
                    reachable.insert(next.to_string());
                }
                queue.push_back(next.to_string());
            }
        }

        // In-degrees restricted to the reachable subgraph. Edges out of the
        // trigger seed layer zero and do not count toward in-degree, so a
        // script reachable only from the trigger starts at in-degree 0.
        let mut in_degree: HashMap<String, usize> =
            reachable.iter().map(|id| (id.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> =
            reachable.iter().map(|id| (id.clone(), Vec::new())).collect();
        for (from, to) in &self.edges {
            if from == trigger_id {
                continue;
            }
            if reachable.contains(from) && reachable.contains(to) {
                *in_degree.get_mut(to).unwrap() += 1;
                dependents.get_mut(from).unwrap().push(to.clone());
            }
        }

        let mut remaining: HashSet<String> = reachable.clone();
        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut frontier: Vec<String> = remaining
            .iter()
            .filter(|id| in_degree[*id] == 0)
            .cloned()
            .collect();

        while !frontier.is_empty() {
            if layers.len() >= max_chain_depth {
                return Err(PipelineCompileError::ChainTooDeep {
                    trigger_id: trigger_id.to_string(),
                    max: max_chain_depth,
                });
            }
            let mut layer = frontier.clone();
            layer.sort();
            for id in &layer {
                remaining.remove(id);
            }

            let mut next_frontier = Vec::new();
            for id in &layer {
                for dependent in &dependents[id] {
                    let degree = in_degree.get_mut(dependent).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        next_frontier.push(dependent.clone());
                    }
                }
            }
            layers.push(layer);
            frontier = next_frontier;
        }

        if !remaining.is_empty() {
            let mut offenders: Vec<String> = remaining.into_iter().collect();
            offenders.sort();
            return Err(PipelineCompileError::CycleDetected {
                trigger_id: trigger_id.to_string(),
                remaining: offenders,
            });
        }

        Ok(ExecutionPlan { hook, mode, layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> PipelineGraph {
        let mut graph = PipelineGraph::default();
        graph.add_trigger("t1", "before_signin", ExecutionMode::Blocking);
        graph.add_script("a");
        graph.add_script("b");
        graph.add_edge("t1", "a");
        graph.add_edge("a", "b");
        graph
    }

    #[test]
    fn linear_chain_produces_one_script_per_layer() {
        let graph = linear_graph();
        let plan = graph.compile_plan("t1", 10).unwrap();
        assert_eq!(plan.layers, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn parallel_scripts_share_a_layer() {
        let mut graph = PipelineGraph::default();
        graph.add_trigger("t1", "before_signin", ExecutionMode::Blocking);
        graph.add_script("a");
        graph.add_script("b");
        graph.add_script("c");
        graph.add_edge("t1", "a");
        graph.add_edge("t1", "b");
        graph.add_edge("a", "c");
        graph.add_edge("b", "c");

        let plan = graph.compile_plan("t1", 10).unwrap();
        assert_eq!(plan.layers.len(), 2);
        let mut layer0 = plan.layers[0].clone();
        layer0.sort();
        assert_eq!(layer0, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(plan.layers[1], vec!["c".to_string()]);
    }

    #[test]
    fn cycle_is_rejected_with_offending_ids() {
        let mut graph = PipelineGraph::default();
        graph.add_trigger("t1", "before_signin", ExecutionMode::Blocking);
        graph.add_script("a");
        graph.add_script("b");
        graph.add_edge("t1", "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");

        let err = graph.compile_plan("t1", 10).unwrap_err();
        assert!(matches!(err, PipelineCompileError::CycleDetected { .. }));
    }

    #[test]
    fn chain_deeper_than_max_is_rejected() {
        let mut graph = PipelineGraph::default();
        graph.add_trigger("t1", "before_signin", ExecutionMode::Blocking);
        let mut prev = "t1".to_string();
        for i in 0..5 {
            let id = format!("s{i}");
            graph.add_script(&id);
            graph.add_edge(&prev, &id);
            prev = id;
        }

        assert!(graph.compile_plan("t1", 5).is_ok());
        assert!(matches!(
            graph.compile_plan("t1", 4).unwrap_err(),
            PipelineCompileError::ChainTooDeep { .. }
        ));
    }

    #[test]
    fn recompiling_the_same_graph_is_idempotent() {
        let graph = linear_graph();
        let first = graph.compile_plan("t1", 10).unwrap();
        let second = graph.compile_plan("t1", 10).unwrap();
        assert_eq!(first, second);
    }

    proptest::proptest! {
        /// For any graph built as consecutive layers of scripts (each layer's
        /// scripts all depending on every script in the layer before it), the
        /// compiled plan must place each script in exactly one layer (I3) and
        /// must be stable under recompilation.
        #[test]
        fn compiled_plan_partitions_every_script_exactly_once(
            layer_sizes in proptest::collection::vec(1usize..4, 1usize..6),
        ) {
            let mut graph = PipelineGraph::default();
            graph.add_trigger("t1", "before_signin", ExecutionMode::Blocking);

            let mut previous_layer: Vec<String> = vec!["t1".to_string()];
            let mut total_scripts = 0usize;
            for (layer_index, size) in layer_sizes.iter().enumerate() {
                let mut current_layer = Vec::with_capacity(*size);
                for i in 0..*size {
                    let id = format!("s{layer_index}_{i}");
                    graph.add_script(&id);
                    for prev in &previous_layer {
                        graph.add_edge(prev, &id);
                    }
                    current_layer.push(id);
                    total_scripts += 1;
                }
                previous_layer = current_layer;
            }

            let plan = graph.compile_plan("t1", 64).unwrap();

            let mut seen = std::collections::HashSet::new();
            for layer in &plan.layers {
                for id in layer {
                    proptest::prop_assert!(seen.insert(id.clone()), "script {} appeared in more than one layer", id);
                }
            }
            proptest::prop_assert_eq!(seen.len(), total_scripts);

            let recompiled = graph.compile_plan("t1", 64).unwrap();
            proptest::prop_assert_eq!(plan, recompiled);
        }
    }
}
