use std::time::Duration;

use futures::future::BoxFuture;

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::registry::{UnitArgs, UnitRegistry};
use switchyard_core::traits::Unit;
use switchyard_core::types::UnitOutput;

/// Emits `params.output` (an object) as its data.
pub struct FixedNode {
    output: serde_json::Map<String, serde_json::Value>,
}

impl Unit for FixedNode {
    fn name(&self) -> &str {
        "FixedNode"
    }

    fn execute<'a>(&'a self, _ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            Ok(UnitOutput {
                data: self.output.clone(),
                ..Default::default()
            })
        })
    }
}

/// Increments a session counter (`params.key`, default `count`) and emits it.
pub struct CounterNode {
    key: String,
}

impl Unit for CounterNode {
    fn name(&self) -> &str {
        "CounterNode"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let current = ctx
                .get_state(&self.key)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let next = current + 1;
            ctx.set_state(self.key.clone(), next.into());
            Ok(UnitOutput::new().with(self.key.clone(), next.into()))
        })
    }
}

/// Stages a write to `params.stage_key` (if set), then fails.
pub struct FailingNode {
    stage_key: Option<String>,
}

impl Unit for FailingNode {
    fn name(&self) -> &str {
        "FailingNode"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            if let Some(ref key) = self.stage_key {
                ctx.set_state(key.clone(), serde_json::json!("should not persist"));
            }
            Err(SwitchyardError::unit("FailingNode", "deliberate failure"))
        })
    }
}

/// Sleeps for `params.sleep_ms` (default 5000).
pub struct SlowTool {
    sleep_ms: u64,
}

impl Unit for SlowTool {
    fn name(&self) -> &str {
        "SlowTool"
    }

    fn execute<'a>(&'a self, _ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
            Ok(UnitOutput::new().with("slept_ms", self.sleep_ms.into()))
        })
    }
}

/// Agent that replies with the query, no LLM involved.
pub struct EchoAgent;

impl Unit for EchoAgent {
    fn name(&self) -> &str {
        "EchoAgent"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move { Ok(UnitOutput::new().with_reply(format!("echo: {}", ctx.query()))) })
    }
}

/// Register every mock under its type name. Call before `freeze`.
pub fn register_mocks(registry: &UnitRegistry) -> Result<()> {
    registry.register_node("FixedNode", |args: UnitArgs| {
        let output = args
            .params
            .get("output")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(FixedNode { output }) as Box<dyn Unit>)
    })?;
    registry.register_node("CounterNode", |args: UnitArgs| {
        let key = args.param_str("key").unwrap_or("count").to_string();
        Ok(Box::new(CounterNode { key }) as Box<dyn Unit>)
    })?;
    registry.register_node("FailingNode", |args: UnitArgs| {
        let stage_key = args.param_str("stage_key").map(String::from);
        Ok(Box::new(FailingNode { stage_key }) as Box<dyn Unit>)
    })?;
    registry.register_tool("SlowTool", |args: UnitArgs| {
        let sleep_ms = args.param_u64("sleep_ms").unwrap_or(5_000);
        Ok(Box::new(SlowTool { sleep_ms }) as Box<dyn Unit>)
    })?;
    registry.register_agent("EchoAgent", |_| Ok(Box::new(EchoAgent) as Box<dyn Unit>))?;
    Ok(())
}
