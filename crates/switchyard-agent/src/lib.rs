pub mod catalog;
pub mod classifier;
pub mod graph;
pub mod orchestrator;
pub mod router;
pub mod sweeper;

pub use catalog::{DomainCatalog, DomainEntry, IntentEntry};
pub use classifier::{Classification, IntentClassifier, LlmIntentClassifier};
pub use graph::{compile, CompiledGraph, GraphExecutor, Guard, RunOutcome, WorkflowDefinition};
pub use orchestrator::{Diagnostics, DomainInfo, ErrorCode, Orchestrator, OrchestratorError, ResultEnvelope};
pub use router::{IntentRouter, RouteDecision, RouteMethod};
pub use sweeper::SessionSweeper;
