use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchyard_core::context::ExecutionContext;
use switchyard_core::registry::{UnitFactory, UnitRegistry};
use switchyard_core::state::StateStore;
use switchyard_core::traits::LlmClient;
use switchyard_core::types::SessionId;

/// The hello domain: a greeting intent and a farewell intent sharing one workflow.
pub const HELLO_DOMAIN: &str = r#"
domain = "hello"

[[intents]]
name = "greet"
description = "Say hello"
keywords = ["hello", "hi", "hey", "good morning"]

[[intents]]
name = "farewell"
description = "Say goodbye"
keywords = ["bye", "goodbye", "see you"]
workflow = "greet"

[[workflows]]
name = "greet"

[[workflows.steps]]
name = "greet"
kind = "node"
unit = "GreetingNode"
"#;

/// A domain built from mocks only, with a bounded reflection loop.
pub const REFLECTION_DOMAIN: &str = r#"
domain = "loop"
default_intent = "refine"

[[intents]]
name = "refine"
keywords = ["refine"]

[[intents]]
name = "explode"
keywords = ["explode"]

[[workflows]]
name = "refine"

[[workflows.steps]]
name = "work"
kind = "node"
unit = "CounterNode"

[[workflows.steps]]
name = "judge"
kind = "node"
unit = "FixedNode"
params = { output = { decision = "reask" } }

[[workflows.steps]]
name = "done"
kind = "agent"
unit = "EchoAgent"

[[workflows.edges]]
from = "work"
to = "judge"

[[workflows.edges]]
from = "judge"
to = "work"
guard = 'decision == "reask"'
max_iterations = 3

[[workflows.edges]]
from = "judge"
to = "done"
guard = 'decision == "ok"'

[[workflows]]
name = "explode"

[[workflows.steps]]
name = "count"
kind = "node"
unit = "CounterNode"

[[workflows.steps]]
name = "boom"
kind = "node"
unit = "FailingNode"
params = { stage_key = "boom_staged" }

[[workflows.edges]]
from = "count"
to = "boom"
"#;

/// Write `<dir>/<domain>.toml` and return its path.
pub fn write_domain(dir: &Path, domain: &str, toml: &str) -> PathBuf {
    let path = dir.join(format!("{}.toml", domain));
    std::fs::write(&path, toml).expect("write domain file");
    path
}

/// An execution context over a fresh in-memory store. Freezes the registry.
pub async fn test_context(
    registry: UnitRegistry,
    llm: Option<Arc<dyn LlmClient>>,
    query: &str,
) -> ExecutionContext {
    registry.freeze().expect("freeze registry");
    let store = Arc::new(StateStore::in_memory());
    let session = store
        .open(&SessionId::new())
        .await
        .expect("open session");
    ExecutionContext::new(
        session,
        "test",
        "test",
        query,
        UnitFactory::new(Arc::new(registry), llm),
        5,
    )
}
