use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::types::UnitOutput;
use switchyard_core::unit::invoke;

use super::compile::{CompiledEdge, CompiledGraph, CompiledStep};

/// One executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: String,
    pub unit: String,
    pub llm_used: bool,
    /// Session writes committed after the step.
    pub committed: usize,
    pub elapsed_ms: u64,
}

/// Result of a completed graph run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Step whose output is the run's result.
    pub final_step: String,
    pub output: UnitOutput,
    /// Step names in visit order, repeats included.
    pub path: Vec<String>,
    pub steps: Vec<StepRecord>,
    /// Times an exhausted reflection edge forced a forward exit.
    pub forced_exits: usize,
    pub llm_used: bool,
    pub total_elapsed_ms: u64,
}

enum Next<'g> {
    Follow(&'g CompiledEdge),
    Forced(&'g CompiledEdge),
    Stop,
}

/// Walks a compiled graph from its entry step.
///
/// Each step gets a fresh unit instance from the context's factory, runs
/// under its effective timeout, and has its session writes committed only if
/// it succeeds. The first outgoing edge whose guard passes is followed.
pub struct GraphExecutor {
    graph: Arc<CompiledGraph>,
}

impl GraphExecutor {
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    /// Run the graph to completion. A failing step yields
    /// `SwitchyardError::Execution` naming that step.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<RunOutcome> {
        let start = Instant::now();
        let mut iterations: HashMap<usize, u32> = HashMap::new();
        let mut path = Vec::new();
        let mut records = Vec::new();
        let mut forced_exits = 0;
        let mut current = self.graph.entry().to_string();

        info!(
            session = %ctx.session_id(),
            domain = %self.graph.domain(),
            intent = %self.graph.intent(),
            workflow = %self.graph.workflow(),
            "Graph run started"
        );

        loop {
            let step = self.graph.step(&current).ok_or_else(|| {
                SwitchyardError::invalid_graph(
                    self.graph.workflow(),
                    format!("step '{}' not found", current),
                )
            })?;
            path.push(step.name.clone());

            let step_start = Instant::now();
            let output = self.run_step(step, ctx).await.map_err(|e| {
                error!(
                    session = %ctx.session_id(),
                    step = %step.name,
                    unit = %step.unit,
                    error = %e,
                    "Graph step failed"
                );
                SwitchyardError::Execution {
                    step: step.name.clone(),
                    source: Box::new(e),
                }
            })?;

            let committed = ctx.state_mut().commit().await.map_err(|e| {
                SwitchyardError::Execution {
                    step: step.name.clone(),
                    source: Box::new(e),
                }
            })?;

            let elapsed_ms = step_start.elapsed().as_millis() as u64;
            debug!(
                step = %step.name,
                llm_used = output.llm_used,
                committed,
                elapsed_ms,
                "Step complete"
            );
            records.push(StepRecord {
                step: step.name.clone(),
                unit: step.unit.clone(),
                llm_used: output.llm_used,
                committed,
                elapsed_ms,
            });

            let view = output.to_value();
            ctx.record(&step.name, output);

            match self.next_edge(&step.name, &view, &mut iterations) {
                Next::Follow(edge) => current = edge.to.clone(),
                Next::Forced(edge) => {
                    forced_exits += 1;
                    current = edge.to.clone();
                }
                Next::Stop => break,
            }
        }

        let final_step = path.last().cloned().unwrap_or_default();
        let output = ctx.result(&final_step).cloned().unwrap_or_default();
        let llm_used = records.iter().any(|r| r.llm_used);
        let total_elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            session = %ctx.session_id(),
            final_step = %final_step,
            steps = path.len(),
            forced_exits,
            total_elapsed_ms,
            "Graph run complete"
        );

        Ok(RunOutcome {
            final_step,
            output,
            path,
            steps: records,
            forced_exits,
            llm_used,
            total_elapsed_ms,
        })
    }

    async fn run_step(&self, step: &CompiledStep, ctx: &mut ExecutionContext) -> Result<UnitOutput> {
        let unit = ctx
            .units()
            .build(step.kind, &step.unit, step.agent.as_deref(), &step.params)?;
        let timeout = unit.effective_timeout(step.timeout_secs, ctx.default_timeout_secs());
        let input = step_input(ctx);
        ctx.set_input(input);

        debug!(step = %step.name, unit = %unit.name(), kind = %step.kind, timeout_secs = timeout, "Running step");
        let result = invoke(&unit, ctx, timeout).await;
        if result.is_err() {
            ctx.state_mut().discard();
        }
        result
    }

    /// Pick the edge to follow after `step`.
    ///
    /// The first passing edge in declaration order wins. A passing reflection
    /// edge whose counter is exhausted is skipped and the first forward edge
    /// is forced regardless of its guard.
    fn next_edge<'g>(
        &'g self,
        step: &'g str,
        result: &serde_json::Value,
        iterations: &mut HashMap<usize, u32>,
    ) -> Next<'g> {
        for edge in self.graph.outgoing(step) {
            if !edge.passes(result) {
                continue;
            }
            let Some(max) = edge.max_iterations else {
                return Next::Follow(edge);
            };
            let count = iterations.entry(edge.index).or_insert(0);
            if *count < max {
                *count += 1;
                debug!(from = %edge.from, to = %edge.to, iteration = *count, max, "Reflection edge taken");
                return Next::Follow(edge);
            }

            return match self.graph.outgoing(step).find(|e| !e.is_reflection()) {
                Some(forward) => {
                    warn!(
                        from = %edge.from,
                        to = %edge.to,
                        max,
                        forced = %forward.to,
                        "Reflection limit reached, forcing forward edge"
                    );
                    Next::Forced(forward)
                }
                None => {
                    warn!(from = %edge.from, to = %edge.to, max, "Reflection limit reached, stopping");
                    Next::Stop
                }
            };
        }
        debug!(step, "No edge passed, graph complete");
        Next::Stop
    }
}

/// Input for the next step: the previous step's result view plus the query.
fn step_input(ctx: &ExecutionContext) -> serde_json::Value {
    let mut input = match ctx.previous() {
        Some((_, output)) => output.to_value(),
        None => serde_json::json!({}),
    };
    if let Some(obj) = input.as_object_mut() {
        obj.entry("query")
            .or_insert_with(|| serde_json::Value::String(ctx.query().to_string()));
    }
    input
}
