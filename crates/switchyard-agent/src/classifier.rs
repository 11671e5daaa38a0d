use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use switchyard_core::error::Result;
use switchyard_core::traits::LlmClient;

use crate::catalog::DomainEntry;

/// An intent proposed by a delegate classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: String,
    pub confidence: f64,
}

/// Delegate consulted by the router when no rule matches.
///
/// Returning an intent that is not in the domain's catalog is allowed; the
/// router ignores it.
pub trait IntentClassifier: Send + Sync + 'static {
    fn classify<'a>(
        &'a self,
        query: &'a str,
        domain: &'a DomainEntry,
    ) -> BoxFuture<'a, Result<Option<Classification>>>;
}

/// Classifier backed by an [`LlmClient`] that answers in JSON.
pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
}

#[derive(Deserialize)]
struct RawClassification {
    intent: Option<String>,
    confidence: Option<f64>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(query: &str, domain: &DomainEntry) -> String {
        let options = domain.intent_names().join(", ");
        let descriptions: Vec<String> = domain
            .intents
            .iter()
            .map(|i| format!("- {}: {}", i.name, i.description))
            .collect();
        format!(
            "You are an intent classifier for the domain '{domain}'.\n\n\
             Possible intents: [{options}]\n\n\
             Descriptions:\n{descriptions}\n\n\
             Identify which intent best fits the user query.\n\
             Return ONLY JSON in this structure:\n\
             {{\"intent\": \"<one of [{options}]>\", \"confidence\": <0.0 - 1.0>}}\n\n\
             Query: {query}",
            domain = domain.name,
            options = options,
            descriptions = descriptions.join("\n"),
            query = query,
        )
    }

    fn parse(raw: &str) -> Option<Classification> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end < start {
            return None;
        }
        let parsed: RawClassification = match serde_json::from_str(&raw[start..=end]) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Classifier returned invalid JSON");
                return None;
            }
        };
        let intent = parsed.intent?.trim().to_string();
        if intent.is_empty() {
            return None;
        }
        Some(Classification {
            intent,
            confidence: parsed.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
        })
    }
}

impl IntentClassifier for LlmIntentClassifier {
    fn classify<'a>(
        &'a self,
        query: &'a str,
        domain: &'a DomainEntry,
    ) -> BoxFuture<'a, Result<Option<Classification>>> {
        Box::pin(async move {
            let raw = self.llm.complete(Self::prompt(query, domain)).await?;
            let parsed = Self::parse(&raw);
            debug!(
                provider = %self.llm.name(),
                domain = %domain.name,
                intent = parsed.as_ref().map(|c| c.intent.as_str()).unwrap_or("-"),
                "LLM classification"
            );
            Ok(parsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DomainCatalog;
    use crate::graph::DomainFile;
    use switchyard_core::registry::UnitRegistry;
    use switchyard_test_utils::{register_mocks, ScriptedLlm, REFLECTION_DOMAIN};

    fn domain() -> DomainEntry {
        let registry = UnitRegistry::new();
        register_mocks(&registry).unwrap();
        registry.freeze().unwrap();
        let file = DomainFile::from_toml(REFLECTION_DOMAIN).unwrap();
        let catalog = DomainCatalog::from_files(vec![file], &registry).unwrap();
        catalog.domain("loop").unwrap().clone()
    }

    #[test]
    fn test_parse() {
        let c = LlmIntentClassifier::parse("Sure! {\"intent\": \"explode\", \"confidence\": 0.7}").unwrap();
        assert_eq!(c.intent, "explode");
        assert!((c.confidence - 0.7).abs() < f64::EPSILON);

        let c = LlmIntentClassifier::parse("{\"intent\": \"refine\"}").unwrap();
        assert!((c.confidence - 0.8).abs() < f64::EPSILON);

        assert!(LlmIntentClassifier::parse("no idea").is_none());
        assert!(LlmIntentClassifier::parse("{\"intent\": \"\"}").is_none());
    }

    #[tokio::test]
    async fn test_classify_sends_intent_options() {
        let llm = Arc::new(ScriptedLlm::new(["{\"intent\": \"explode\", \"confidence\": 0.9}"]));
        let classifier = LlmIntentClassifier::new(llm.clone());
        let domain = domain();

        let result = classifier.classify("make it go", &domain).await.unwrap().unwrap();
        assert_eq!(result.intent, "explode");

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("domain 'loop'"));
        assert!(prompts[0].contains("[refine, explode]"));
        assert!(prompts[0].contains("Query: make it go"));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let classifier = LlmIntentClassifier::new(Arc::new(ScriptedLlm::failing("offline")));
        assert!(classifier.classify("x", &domain()).await.is_err());
    }
}
