use futures::future::BoxFuture;

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::Result;
use switchyard_core::registry::UnitArgs;
use switchyard_core::traits::Unit;
use switchyard_core::types::UnitOutput;

const DEFAULT_LIMIT: usize = 5;
const SUMMARY_CHARS: usize = 500;

/// Returns the session's most recent turns and a short summary.
///
/// Reads `limit` from the step input, falling back to `params.limit`.
pub struct RecallTool {
    limit: usize,
}

impl RecallTool {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn from_args(args: &UnitArgs) -> Self {
        Self::new(
            args.param_u64("limit")
                .map(|l| l as usize)
                .unwrap_or(DEFAULT_LIMIT),
        )
    }
}

impl Unit for RecallTool {
    fn name(&self) -> &str {
        "RecallTool"
    }

    fn description(&self) -> &str {
        "Recent conversation turns for this session"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let limit = ctx
                .input()
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|l| l as usize)
                .unwrap_or(self.limit);

            let snapshot = ctx.state().snapshot();
            let start = snapshot.transcript.len().saturating_sub(limit);
            let turns: Vec<serde_json::Value> = snapshot.transcript[start..]
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "query": t.query,
                        "intent": t.intent,
                        "text": t.summary_text(),
                        "timestamp": t.timestamp.to_rfc3339(),
                    })
                })
                .collect();

            Ok(UnitOutput::new()
                .with("count", turns.len().into())
                .with("summary", snapshot.summary(limit, SUMMARY_CHARS).into())
                .with("turns", serde_json::Value::Array(turns)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchyard_core::registry::{UnitFactory, UnitRegistry};
    use switchyard_core::state::StateStore;
    use switchyard_core::types::{SessionId, Turn};

    #[tokio::test]
    async fn test_recalls_recent_turns() {
        let store = Arc::new(StateStore::in_memory());
        let sid = SessionId::from_string("recall");
        for (q, reply) in [("hi", "Hello!"), ("weather?", "Sunny."), ("thanks", "Anytime.")] {
            store
                .append_turn(&sid, Turn::new(q, "hello", "greet", serde_json::json!({"reply": reply})))
                .await
                .unwrap();
        }
        let registry = UnitRegistry::new();
        registry.freeze().unwrap();
        let session = store.open(&sid).await.unwrap();
        let mut ctx = ExecutionContext::new(
            session,
            "hello",
            "recall",
            "what did we say",
            UnitFactory::new(Arc::new(registry), None),
            5,
        );

        let out = RecallTool::new(2).execute(&mut ctx).await.unwrap();
        assert_eq!(out.get("count"), Some(&serde_json::json!(2)));
        assert_eq!(out.get_str("summary"), Some("Sunny. Anytime."));
        assert_eq!(out.get("turns").unwrap()[0]["query"], "weather?");

        ctx.set_input(serde_json::json!({"limit": 10}));
        let out = RecallTool::new(2).execute(&mut ctx).await.unwrap();
        assert_eq!(out.get("count"), Some(&serde_json::json!(3)));
    }
}
