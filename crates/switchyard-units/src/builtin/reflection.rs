use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use switchyard_core::context::ExecutionContext;
use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::registry::UnitArgs;
use switchyard_core::traits::{LlmClient, Unit};
use switchyard_core::types::UnitOutput;

use super::extract_json;

/// LLM-backed self-evaluation of the previous step's answer.
///
/// Emits `decision` (`ok` or `reask`), `score` and `comment`; a reask also
/// carries a `clarify_question`. Wire it before a back-edge guarded on
/// `decision == "reask"` to form a reflection loop.
pub struct ReflectionNode {
    llm: Option<Arc<dyn LlmClient>>,
    min_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Review {
    decision: String,
    score: f64,
    comment: String,
}

impl ReflectionNode {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            llm,
            min_score: None,
        }
    }

    /// `params.min_score` turns any lower score into a reask.
    pub fn from_args(args: &UnitArgs) -> Self {
        Self {
            llm: args.llm.clone(),
            min_score: args.params.get("min_score").and_then(|v| v.as_f64()),
        }
    }

    fn answer(ctx: &ExecutionContext) -> Option<String> {
        if let Some(answer) = ctx.input().get("answer").and_then(|v| v.as_str()) {
            return Some(answer.to_string());
        }
        let (_, previous) = ctx.previous()?;
        previous
            .reply
            .clone()
            .or_else(|| {
                ["agent_reply", "answer", "previous_output"]
                    .iter()
                    .find_map(|k| previous.get_str(k).map(String::from))
            })
            .filter(|a| !a.trim().is_empty())
    }

    async fn clarify(llm: &dyn LlmClient, query: &str) -> String {
        let prompt = format!("Generate a short follow-up question to clarify: {}", query);
        match llm.complete(prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Clarification generation failed");
                format!("Could you clarify your question about: {}?", query)
            }
        }
    }
}

fn review_prompt(query: &str, answer: &str) -> String {
    format!(
        "You are a strict evaluator of AI responses.\n\n\
         Evaluate the assistant's answer for the given question.\n\n\
         Question: {}\n\
         Answer: {}\n\n\
         Return JSON:\n\
         {{\"score\": float (0.0 - 1.0), \"decision\": \"ok\" or \"reask\", \
         \"comment\": \"Explain your reasoning in one line.\"}}",
        query, answer
    )
}

fn parse_review(raw: &str) -> Review {
    let Some(parsed) = extract_json(raw) else {
        warn!(raw = %raw, "Non-JSON review received");
        return Review {
            decision: "ok".into(),
            score: 0.8,
            comment: "Could not parse; assumed OK.".into(),
        };
    };
    let decision = match parsed.get("decision").and_then(|v| v.as_str()) {
        Some("reask") => "reask",
        _ => "ok",
    };
    let default_score = if decision == "reask" { 0.6 } else { 0.9 };
    Review {
        decision: decision.to_string(),
        score: parsed
            .get("score")
            .and_then(|v| v.as_f64())
            .unwrap_or(default_score),
        comment: parsed
            .get("comment")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

impl Unit for ReflectionNode {
    fn name(&self) -> &str {
        "ReflectionNode"
    }

    fn description(&self) -> &str {
        "Reviews the previous answer and decides whether to ask again"
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let query = ctx.query().to_string();

            let Some(answer) = Self::answer(ctx) else {
                warn!(query = %query, "No answer found, skipping reflection");
                return Ok(UnitOutput::new()
                    .with("decision", "ok".into())
                    .with("score", 1.0.into())
                    .with("comment", "No answer to review.".into()));
            };

            let Some(ref llm) = self.llm else {
                warn!("No LLM configured, reflection assumes OK");
                return Ok(UnitOutput::new()
                    .with("decision", "ok".into())
                    .with("score", 0.8.into())
                    .with("comment", "No reviewer configured; assumed OK.".into()));
            };

            let raw = llm
                .complete(review_prompt(&query, &answer))
                .await
                .map_err(|e| {
                    SwitchyardError::unit(
                        "ReflectionNode",
                        format!("Reflection LLM evaluation failed: {}", e),
                    )
                })?;

            let mut review = parse_review(&raw);
            if let Some(min) = self.min_score {
                if review.score < min {
                    review.decision = "reask".into();
                }
            }

            let mut output = UnitOutput::new()
                .with("decision", review.decision.clone().into())
                .with("score", review.score.into())
                .with("comment", review.comment.into())
                .generated();

            if review.decision == "reask" {
                let question = Self::clarify(llm.as_ref(), &query).await;
                info!(query = %query, clarify_question = %question, "Reask triggered");
                output = output.with("clarify_question", question.into());
            } else {
                info!(query = %query, score = review.score, "Reflection complete");
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::registry::UnitRegistry;
    use switchyard_test_utils::{test_context, ScriptedLlm};

    fn answered(ctx: &mut ExecutionContext) {
        ctx.record(
            "answer",
            UnitOutput::new().with_reply("Rust is a systems language."),
        );
    }

    #[test]
    fn test_parse_review() {
        let r = parse_review(r#"{"decision": "reask", "comment": "vague"}"#);
        assert_eq!(r.decision, "reask");
        assert_eq!(r.score, 0.6);
        assert_eq!(r.comment, "vague");

        let r = parse_review("looks fine to me");
        assert_eq!(r.decision, "ok");
        assert_eq!(r.score, 0.8);
    }

    #[tokio::test]
    async fn test_ok_review() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"score": 0.95, "decision": "ok", "comment": "accurate"}"#,
        ]));
        let mut ctx = test_context(UnitRegistry::new(), None, "what is rust?").await;
        answered(&mut ctx);

        let out = ReflectionNode::new(Some(llm.clone()))
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(out.get_str("decision"), Some("ok"));
        assert_eq!(out.get("score"), Some(&serde_json::json!(0.95)));
        assert!(out.get("clarify_question").is_none());
        assert!(out.llm_used);
        assert!(llm.prompts()[0].contains("Rust is a systems language."));
    }

    #[tokio::test]
    async fn test_reask_asks_clarification() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"score": 0.3, "decision": "reask", "comment": "off topic"}"#,
            "Which Rust edition do you mean?",
        ]));
        let mut ctx = test_context(UnitRegistry::new(), None, "rust?").await;
        answered(&mut ctx);

        let out = ReflectionNode::new(Some(llm)).execute(&mut ctx).await.unwrap();
        assert_eq!(out.get_str("decision"), Some("reask"));
        assert_eq!(
            out.get_str("clarify_question"),
            Some("Which Rust edition do you mean?")
        );
    }

    #[tokio::test]
    async fn test_min_score_forces_reask() {
        let llm = Arc::new(ScriptedLlm::new([r#"{"score": 0.5, "decision": "ok"}"#]));
        let mut ctx = test_context(UnitRegistry::new(), None, "rust?").await;
        answered(&mut ctx);

        let node = ReflectionNode::from_args(
            &UnitArgs::new()
                .with_llm(llm)
                .with_params(serde_json::json!({"min_score": 0.7})),
        );
        let out = node.execute(&mut ctx).await.unwrap();
        assert_eq!(out.get_str("decision"), Some("reask"));
    }

    #[tokio::test]
    async fn test_no_answer_skips() {
        let llm = Arc::new(ScriptedLlm::new(["unused"]));
        let mut ctx = test_context(UnitRegistry::new(), None, "rust?").await;
        let out = ReflectionNode::new(Some(llm.clone()))
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(out.get_str("decision"), Some("ok"));
        assert_eq!(out.get("score"), Some(&serde_json::json!(1.0)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_llm_failure_is_unit_error() {
        let llm = Arc::new(ScriptedLlm::failing("timeout upstream"));
        let mut ctx = test_context(UnitRegistry::new(), None, "rust?").await;
        answered(&mut ctx);
        let err = ReflectionNode::new(Some(llm))
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::UnitExecution { .. }));
    }
}
