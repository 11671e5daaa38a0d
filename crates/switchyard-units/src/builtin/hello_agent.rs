use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::Result;
use switchyard_core::traits::{LlmClient, Unit};
use switchyard_core::types::UnitOutput;

use super::now_rfc3339;

/// Minimal agent: asks the LLM for a cheerful reply to the query.
///
/// LLM failures degrade to a canned reply with `llm_used = false`.
pub struct HelloAgent {
    llm: Option<Arc<dyn LlmClient>>,
}

impl HelloAgent {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }
}

impl Unit for HelloAgent {
    fn name(&self) -> &str {
        "HelloAgent"
    }

    fn description(&self) -> &str {
        "Greets the user through the LLM provider"
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
            let timestamp = now_rfc3339();

            let completion = match self.llm {
                Some(ref llm) => {
                    let prompt = format!(
                        "You are a friendly assistant. Reply to: '{}' in a cheerful tone.",
                        query
                    );
                    debug!(provider = %llm.name(), "Calling LLM");
                    llm.complete(prompt).await.map_err(|e| e.to_string())
                }
                None => Err("no LLM provider configured".to_string()),
            };

            let output = UnitOutput::new()
                .with("timestamp", timestamp.into())
                .with("agent", self.name().into());

            match completion {
                Ok(text) => Ok(output
                    .with_reply(format!("👋 Hello! You said: '{}'.\nLLM says: {}", query, text))
                    .generated()),
                Err(e) => {
                    warn!(error = %e, "HelloAgent LLM call failed");
                    Ok(output.with_reply(format!(
                        "👋 Hello! You said: '{}', but LLM call failed: {}",
                        query, e
                    )))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::registry::UnitRegistry;
    use switchyard_test_utils::{test_context, ScriptedLlm};

    #[tokio::test]
    async fn test_reply_from_llm() {
        let llm = Arc::new(ScriptedLlm::new(["Hi friend!"]));
        let mut ctx = test_context(UnitRegistry::new(), None, "  hello  ").await;
        let out = HelloAgent::new(Some(llm.clone())).execute(&mut ctx).await.unwrap();

        assert_eq!(
            out.reply.as_deref(),
            Some("👋 Hello! You said: 'hello'.\nLLM says: Hi friend!")
        );
        assert!(out.llm_used);
        assert!(llm.prompts()[0].contains("Reply to: 'hello'"));
        assert_eq!(out.get_str("agent"), Some("HelloAgent"));
    }

    #[tokio::test]
    async fn test_llm_failure_degrades() {
        let llm = Arc::new(ScriptedLlm::failing("rate limited"));
        let mut ctx = test_context(UnitRegistry::new(), None, "hello").await;
        let out = HelloAgent::new(Some(llm)).execute(&mut ctx).await.unwrap();
        assert!(!out.llm_used);
        assert!(out.reply.unwrap().contains("LLM call failed"));
    }

    #[tokio::test]
    async fn test_without_llm() {
        let mut ctx = test_context(UnitRegistry::new(), None, "hello").await;
        let out = HelloAgent::new(None).execute(&mut ctx).await.unwrap();
        assert!(!out.llm_used);
        assert!(out.reply.unwrap().contains("no LLM provider configured"));
    }
}
