use futures::future::BoxFuture;
use tracing::{debug, info};

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::Result;
use switchyard_core::registry::UnitArgs;
use switchyard_core::traits::Unit;
use switchyard_core::types::UnitOutput;

use super::now_rfc3339;

/// Session key holding the collected feedback entries.
pub const FEEDBACK_KEY: &str = "feedback";

/// Records the previous step's verdict and decides the next action.
///
/// Reads `decision`, `score` and `comment` from the previous step's output,
/// appends an entry to the session's `feedback` list and emits
/// `next_action`: `retry`, `review` or `proceed`. The reply of the reviewed
/// step (`params.answer_step`, default `answer`) is passed through.
pub struct FeedbackNode {
    source: String,
    answer_step: String,
}

impl FeedbackNode {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            answer_step: "answer".to_string(),
        }
    }

    pub fn from_args(args: &UnitArgs) -> Self {
        let mut node = Self::new(args.param_str("source").unwrap_or("reflection"));
        if let Some(step) = args.param_str("answer_step") {
            node.answer_step = step.to_string();
        }
        node
    }
}

pub fn next_action(decision: &str, score: f64) -> &'static str {
    if decision == "reask" || score < 0.5 {
        "retry"
    } else if score < 0.8 {
        "review"
    } else {
        "proceed"
    }
}

impl Unit for FeedbackNode {
    fn name(&self) -> &str {
        "FeedbackNode"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let verdict = ctx
                .previous()
                .map(|(_, out)| out.to_value())
                .unwrap_or_default();
            let decision = verdict
                .get("decision")
                .and_then(|v| v.as_str())
                .unwrap_or("ok")
                .to_string();
            let score = verdict.get("score").and_then(|v| v.as_f64()).unwrap_or(0.8);
            let comment = verdict
                .get("comment")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let entry = serde_json::json!({
                "session_id": ctx.session_id().as_str(),
                "decision": decision,
                "score": score,
                "comment": comment,
                "source": self.source,
                "timestamp": now_rfc3339(),
            });
            info!(
                session = %ctx.session_id(),
                source = %self.source,
                decision = %decision,
                score,
                "Feedback collected"
            );

            let mut entries = ctx
                .get_state(FEEDBACK_KEY)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            entries.push(entry.clone());
            ctx.set_state(FEEDBACK_KEY, serde_json::Value::Array(entries));

            let action = next_action(&decision, score);
            debug!(next_action = action, "Feedback processed");

            let mut output = UnitOutput::new()
                .with("status", "recorded".into())
                .with("next_action", action.into())
                .with("feedback", entry);
            if let Some(reply) = ctx.result(&self.answer_step).and_then(|o| o.reply.clone()) {
                output = output.with_reply(reply);
            }
            Ok(output)
        })
    }
}
