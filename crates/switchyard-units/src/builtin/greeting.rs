use futures::future::BoxFuture;
use tracing::{info, warn};

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::Result;
use switchyard_core::traits::Unit;
use switchyard_core::types::UnitOutput;
use switchyard_core::unit::{invoke, CapabilityUnit};

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "morning"];
const FAREWELL_WORDS: &[&str] = &["bye", "goodbye", "see you"];

pub const GREETING: &str = "Hello there 👋! Let me think about that for you...";
pub const FAREWELL: &str = "Goodbye! Have a great day ahead 👋";

/// Rule-based greeting, optionally followed by a call to a bound agent.
///
/// Farewells end the step immediately without consulting the agent. A
/// failing agent does not fail the step: the greeting is returned with the
/// error text under `error`.
pub struct GreetingNode {
    agent: Option<CapabilityUnit>,
}

impl GreetingNode {
    pub fn new(agent: Option<CapabilityUnit>) -> Self {
        Self { agent }
    }
}

enum Salutation {
    Greeting,
    Farewell,
    Echo(String),
}

fn classify(query: &str) -> Salutation {
    let lower = query.to_lowercase();
    if GREETING_WORDS.iter().any(|w| lower.contains(w)) {
        Salutation::Greeting
    } else if FAREWELL_WORDS.iter().any(|w| lower.contains(w)) {
        Salutation::Farewell
    } else {
        Salutation::Echo(format!("You said: {}", query))
    }
}

impl Unit for GreetingNode {
    fn name(&self) -> &str {
        "GreetingNode"
    }

    fn description(&self) -> &str {
        "Greets the user and hands the query to a bound agent"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let query = ctx
                .input()
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or(ctx.query())
                .trim()
                .to_string();

            let greeting = match classify(&query) {
                Salutation::Greeting => GREETING.to_string(),
                Salutation::Farewell => {
                    return Ok(UnitOutput::new()
                        .with("greeting", FAREWELL.into())
                        .with("farewell", true.into()));
                }
                Salutation::Echo(text) => text,
            };

            let output = UnitOutput::new().with("greeting", greeting.into());
            let Some(ref agent) = self.agent else {
                return Ok(output);
            };

            let timeout = agent.effective_timeout(None, ctx.default_timeout_secs());
            match invoke(agent, ctx, timeout).await {
                Ok(reply) => {
                    info!(agent = %agent.name(), "Greeting agent replied");
                    let mut output = output
                        .with(
                            "agent_reply",
                            reply.reply.clone().map(serde_json::Value::String).unwrap_or_default(),
                        )
                        .with(
                            "timestamp",
                            reply.get("timestamp").cloned().unwrap_or_default(),
                        );
                    output.llm_used = reply.llm_used;
                    Ok(output)
                }
                Err(e) => {
                    warn!(agent = %agent.name(), error = %e, "Greeting agent failed");
                    Ok(output.with("error", e.to_string().into()))
                }
            }
        })
    }
}
