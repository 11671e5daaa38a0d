use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::registry::UnitRegistry;
use switchyard_core::types::UnitKind;

use super::definition::WorkflowDefinition;
use super::guard::Guard;

/// A step ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub name: String,
    pub kind: UnitKind,
    pub unit: String,
    pub agent: Option<String>,
    pub timeout_secs: Option<u64>,
    pub params: serde_json::Value,
}

/// An edge with its guard already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEdge {
    /// Position in declaration order; keys the per-run iteration counters.
    pub index: usize,
    pub from: String,
    pub to: String,
    pub guard: Option<Guard>,
    pub max_iterations: Option<u32>,
}

impl CompiledEdge {
    pub fn is_reflection(&self) -> bool {
        self.max_iterations.is_some()
    }

    /// Whether the guard passes for a step result. No guard always passes.
    pub fn passes(&self, result: &serde_json::Value) -> bool {
        self.guard.as_ref().map_or(true, |g| g.evaluate(result))
    }
}

/// Immutable, validated workflow graph for one (domain, intent).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    domain: String,
    intent: String,
    workflow: String,
    entry: String,
    steps: Vec<CompiledStep>,
    edges: Vec<CompiledEdge>,
}

impl CompiledGraph {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    pub fn edges(&self) -> &[CompiledEdge] {
        &self.edges
    }

    pub fn step(&self, name: &str) -> Option<&CompiledStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Outgoing edges of a step, in declaration order.
    pub fn outgoing<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a CompiledEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == step)
    }

    /// Steps with no outgoing edges.
    pub fn terminals(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| self.outgoing(&s.name).next().is_none())
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Validate a workflow definition against the frozen registry and compile it.
///
/// Deterministic: the same definition and registry always give equal graphs.
pub fn compile(
    domain: &str,
    intent: &str,
    definition: &WorkflowDefinition,
    registry: &UnitRegistry,
) -> Result<CompiledGraph> {
    let label = format!("{}/{}", domain, definition.name);
    let invalid = |reason: String| SwitchyardError::invalid_graph(label.clone(), reason);

    if !registry.is_frozen() {
        return Err(SwitchyardError::RegistryNotFrozen);
    }
    if definition.steps.is_empty() {
        return Err(invalid("workflow has no steps".into()));
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(invalid(format!("duplicate step name '{}'", step.name)));
        }
    }

    let entry = definition
        .entry
        .clone()
        .unwrap_or_else(|| definition.steps[0].name.clone());
    if !seen.contains(entry.as_str()) {
        return Err(invalid(format!("entry step '{}' is not defined", entry)));
    }

    let mut steps = Vec::with_capacity(definition.steps.len());
    for step in &definition.steps {
        if !registry.contains(step.kind, &step.unit) {
            return Err(invalid(format!(
                "step '{}' uses unregistered {} '{}'",
                step.name, step.kind, step.unit
            )));
        }
        if let Some(ref agent) = step.agent {
            if !registry.contains(UnitKind::Agent, agent) {
                return Err(invalid(format!(
                    "step '{}' binds unregistered agent '{}'",
                    step.name, agent
                )));
            }
        }
        if step.timeout_secs == Some(0) {
            return Err(invalid(format!("step '{}' has timeout_secs = 0", step.name)));
        }
        steps.push(CompiledStep {
            name: step.name.clone(),
            kind: step.kind,
            unit: step.unit.clone(),
            agent: step.agent.clone(),
            timeout_secs: step.timeout_secs,
            params: step.params.clone(),
        });
    }

    let mut edges = Vec::with_capacity(definition.edges.len());
    for (index, edge) in definition.edges.iter().enumerate() {
        for end in [&edge.from, &edge.to] {
            if !seen.contains(end.as_str()) {
                return Err(invalid(format!(
                    "edge {} -> {} references unknown step '{}'",
                    edge.from, edge.to, end
                )));
            }
        }
        if edge.max_iterations == Some(0) {
            return Err(invalid(format!(
                "edge {} -> {} has max_iterations = 0",
                edge.from, edge.to
            )));
        }
        let guard = match edge.guard {
            Some(ref expr) => Some(Guard::parse(expr).map_err(|reason| {
                invalid(format!(
                    "edge {} -> {} has invalid guard '{}': {}",
                    edge.from, edge.to, expr, reason
                ))
            })?),
            None => None,
        };
        edges.push(CompiledEdge {
            index,
            from: edge.from.clone(),
            to: edge.to.clone(),
            guard,
            max_iterations: edge.max_iterations,
        });
    }

    if let Some(cycle) = find_unbounded_cycle(&steps, &edges) {
        return Err(invalid(format!(
            "cycle {} is not bounded by a max_iterations edge",
            cycle.join(" -> ")
        )));
    }

    let unreachable = unreachable_steps(&entry, &steps, &edges);
    if !unreachable.is_empty() {
        return Err(invalid(format!(
            "steps not reachable from entry '{}': {}",
            entry,
            unreachable.join(", ")
        )));
    }

    debug!(
        domain,
        intent,
        workflow = %definition.name,
        steps = steps.len(),
        edges = edges.len(),
        "Workflow compiled"
    );

    Ok(CompiledGraph {
        domain: domain.to_string(),
        intent: intent.to_string(),
        workflow: definition.name.clone(),
        entry,
        steps,
        edges,
    })
}

/// Depth-first search over forward (non-reflection) edges. Returns the first
/// cycle found as a closed path of step names.
fn find_unbounded_cycle(steps: &[CompiledStep], edges: &[CompiledEdge]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges.iter().filter(|e| !e.is_reflection()) {
        forward.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let mut marks: HashMap<&str, Mark> = steps.iter().map(|s| (s.name.as_str(), Mark::New)).collect();

    for root in steps.iter().map(|s| s.name.as_str()) {
        if marks[root] != Mark::New {
            continue;
        }
        // Stack of (step, next child index); `path` mirrors the active steps.
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut path: Vec<&str> = vec![root];
        marks.insert(root, Mark::Active);

        while let Some((node, child)) = stack.last_mut() {
            let children = forward.get(*node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&next) = children.get(*child) {
                *child += 1;
                match marks[next] {
                    Mark::New => {
                        marks.insert(next, Mark::Active);
                        stack.push((next, 0));
                        path.push(next);
                    }
                    Mark::Active => {
                        let start = path.iter().position(|s| *s == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                path.pop();
            }
        }
    }
    None
}

fn unreachable_steps(entry: &str, steps: &[CompiledStep], edges: &[CompiledEdge]) -> Vec<String> {
    let mut reached: HashSet<&str> = HashSet::from([entry]);
    let mut queue: VecDeque<&str> = VecDeque::from([entry]);
    while let Some(step) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.from == step) {
            if reached.insert(edge.to.as_str()) {
                queue.push_back(edge.to.as_str());
            }
        }
    }
    steps
        .iter()
        .filter(|s| !reached.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect()
}
