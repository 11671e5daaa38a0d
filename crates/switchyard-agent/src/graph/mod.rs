//! Workflow graphs: declarative definitions, compilation and execution.
//!
//! A domain file declares workflows as ordered steps joined by edges. Each
//! workflow is compiled once into an immutable [`CompiledGraph`], which is
//! validated against the frozen unit registry and shared across runs. The
//! [`GraphExecutor`] walks a compiled graph from its entry step, running one
//! capability unit per step and following the first outgoing edge whose
//! guard passes. Back-edges marked with `max_iterations` form bounded
//! reflection loops.

pub mod compile;
pub mod definition;
pub mod executor;
pub mod guard;

pub use compile::{compile, CompiledEdge, CompiledGraph, CompiledStep};
pub use definition::{DomainFile, EdgeDescriptor, IntentDef, StepDescriptor, WorkflowDefinition};
pub use executor::{GraphExecutor, RunOutcome, StepRecord};
pub use guard::Guard;
