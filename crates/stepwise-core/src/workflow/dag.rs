//! Dependency graph over workflow steps.
//!
//! Edges come from two sources:
//!
//! 1. **Implicit** -- a step whose inputs reference `{{v}}` (in any token
//!    form) depends on the step that produces variable `v` through its
//!    `outputs` mapping. A `variable` step with no `outputs` produces each of
//!    its own input keys.
//! 2. **Explicit** -- every id listed in `dependsOn`.
//!
//! When several steps declare the same variable, the last one in declared
//! order is its producer. A step never depends on itself through its own
//! outputs.
//!
//! The scheduler only needs [`DependencyGraph::ready`]. Waves and cycle
//! reports are computed with `petgraph` for previews and error messages.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::DiGraph;
use stepwise_types::workflow::{StepType, WorkflowStep};

use super::definition::WorkflowError;
use crate::template::{for_each_string, referenced_names};

// ---------------------------------------------------------------------------
// Producer map
// ---------------------------------------------------------------------------

/// Variable name to the id of the step that binds it.
pub fn producer_map(steps: &[WorkflowStep]) -> HashMap<&str, &str> {
    let mut producers = HashMap::new();
    for step in steps {
        for variable in step.outputs.values() {
            producers.insert(variable.as_str(), step.id.as_str());
        }
        if step.step_type == StepType::Variable && step.outputs.is_empty() {
            for key in step.inputs.keys() {
                producers.insert(key.as_str(), step.id.as_str());
            }
        }
    }
    producers
}

/// Every variable name referenced by templates anywhere in a step's inputs.
pub fn step_references(step: &WorkflowStep) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for value in step.inputs.values() {
        for_each_string(value, &mut |s| names.extend(referenced_names(s)));
    }
    names
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Predecessor sets for every step, plus the declared step order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph. Fails on an explicit dependency naming an unknown step.
    pub fn build(steps: &[WorkflowStep]) -> Result<Self, WorkflowError> {
        let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let producers = producer_map(steps);

        let mut predecessors = BTreeMap::new();
        for step in steps {
            let mut preds = BTreeSet::new();

            for name in step_references(step) {
                match producers.get(name.as_str()) {
                    Some(&producer) if producer != step.id => {
                        preds.insert(producer.to_string());
                    }
                    _ => {}
                }
            }

            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                preds.insert(dep.clone());
            }

            predecessors.insert(step.id.clone(), preds);
        }

        Ok(Self {
            order: steps.iter().map(|s| s.id.clone()).collect(),
            predecessors,
        })
    }

    /// Step ids in declared order.
    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct predecessors of a step.
    pub fn predecessors(&self, step_id: &str) -> Option<&BTreeSet<String>> {
        self.predecessors.get(step_id)
    }

    /// Steps that directly depend on `step_id`, in declared order.
    pub fn dependents(&self, step_id: &str) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| {
                self.predecessors
                    .get(id.as_str())
                    .is_some_and(|preds| preds.contains(step_id))
            })
            .map(String::as_str)
            .collect()
    }

    /// Every step reachable from `step_id` along dependency edges, excluding
    /// `step_id` itself unless it sits on a cycle.
    pub fn transitive_dependents(&self, step_id: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![step_id.to_string()];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(&current) {
                if visited.insert(dependent.to_string()) {
                    stack.push(dependent.to_string());
                }
            }
        }
        visited
    }

    /// Steps that are not `settled` and whose predecessors are all
    /// `satisfied`, in declared order.
    ///
    /// `satisfied` holds steps whose completion unblocks dependents;
    /// `settled` additionally holds steps that will never be dispatched again
    /// (failed, or skipped because a predecessor failed).
    pub fn ready<'a>(
        &'a self,
        settled: &HashSet<String>,
        satisfied: &HashSet<String>,
    ) -> Vec<&'a str> {
        self.order
            .iter()
            .filter(|id| !settled.contains(id.as_str()))
            .filter(|id| {
                self.predecessors
                    .get(id.as_str())
                    .is_none_or(|preds| preds.iter().all(|p| satisfied.contains(p)))
            })
            .map(String::as_str)
            .collect()
    }

    fn to_petgraph(&self) -> (DiGraph<&str, ()>, HashMap<&str, petgraph::graph::NodeIndex>) {
        let mut graph = DiGraph::<&str, ()>::new();
        let nodes: HashMap<&str, _> = self
            .order
            .iter()
            .map(|id| (id.as_str(), graph.add_node(id.as_str())))
            .collect();
        for (id, preds) in &self.predecessors {
            for pred in preds {
                if let (Some(&from), Some(&to)) = (nodes.get(pred.as_str()), nodes.get(id.as_str()))
                {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, nodes)
    }

    /// Group steps into parallel waves: wave `n` holds the steps whose
    /// longest predecessor chain has length `n`. Each wave is in declared
    /// order.
    pub fn waves(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
        if self.order.is_empty() {
            return Ok(Vec::new());
        }
        let (graph, _) = self.to_petgraph();
        let sorted = toposort(&graph, None)
            .map_err(|_| WorkflowError::CircularDependency(self.cycle_members()))?;

        let mut depths: HashMap<&str, usize> = HashMap::new();
        for node in sorted {
            let id = graph[node];
            let depth = self
                .predecessors
                .get(id)
                .into_iter()
                .flatten()
                .map(|p| depths.get(p.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(id, depth);
        }

        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut waves = vec![Vec::new(); max_depth + 1];
        for id in &self.order {
            let depth = depths.get(id.as_str()).copied().unwrap_or(0);
            waves[depth].push(id.clone());
        }
        Ok(waves)
    }

    /// Strongly connected components that form cycles (including self-loops),
    /// each sorted by declared order.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let (graph, _) = self.to_petgraph();
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| graph.contains_edge(n, n))
            })
            .map(|component| {
                let mut ids: Vec<&str> = component.into_iter().map(|n| graph[n]).collect();
                ids.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
                ids.into_iter().map(str::to_string).collect()
            })
            .collect();
        cycles.sort_by_key(|c| {
            c.first()
                .and_then(|id| position.get(id.as_str()).copied())
                .unwrap_or(usize::MAX)
        });
        cycles
    }

    /// All step ids that sit on some cycle, in declared order.
    pub fn cycle_members(&self) -> Vec<String> {
        let members: HashSet<String> = self.cycles().into_iter().flatten().collect();
        self.order
            .iter()
            .filter(|id| members.contains(*id))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
