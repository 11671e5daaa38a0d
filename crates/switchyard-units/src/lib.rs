pub mod builtin;

use switchyard_core::error::Result;
use switchyard_core::registry::{UnitArgs, UnitRegistry};
use switchyard_core::traits::Unit;

pub use builtin::feedback::FeedbackNode;
pub use builtin::greeting::GreetingNode;
pub use builtin::hello_agent::HelloAgent;
pub use builtin::recall::RecallTool;
pub use builtin::reflection::ReflectionNode;

/// Register every built-in unit. Call before `freeze`.
pub fn register_builtins(registry: &UnitRegistry) -> Result<()> {
    registry.register_node("GreetingNode", |args: UnitArgs| {
        Ok(Box::new(GreetingNode::new(args.agent)) as Box<dyn Unit>)
    })?;
    registry.register_node("ReflectionNode", |args: UnitArgs| {
        Ok(Box::new(ReflectionNode::from_args(&args)) as Box<dyn Unit>)
    })?;
    registry.register_node("FeedbackNode", |args: UnitArgs| {
        Ok(Box::new(FeedbackNode::from_args(&args)) as Box<dyn Unit>)
    })?;
    registry.register_agent("HelloAgent", |args: UnitArgs| {
        Ok(Box::new(HelloAgent::new(args.llm)) as Box<dyn Unit>)
    })?;
    registry.register_tool("RecallTool", |args: UnitArgs| {
        Ok(Box::new(RecallTool::from_args(&args)) as Box<dyn Unit>)
    })?;
    Ok(())
}
