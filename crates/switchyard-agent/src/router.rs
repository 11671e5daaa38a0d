use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use switchyard_core::error::{Result, SwitchyardError};

use crate::catalog::{DomainCatalog, DomainEntry, IntentEntry};
use crate::classifier::IntentClassifier;
use crate::graph::CompiledGraph;

/// How an intent was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMethod {
    Rule,
    Classifier,
    Default,
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => write!(f, "rule"),
            Self::Classifier => write!(f, "classifier"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Routing result: the intent to run and its compiled graph.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub domain: String,
    pub intent: String,
    pub graph: Arc<CompiledGraph>,
    pub method: RouteMethod,
    /// First rule (keyword or pattern) that matched, for `Rule`.
    pub matched: Option<String>,
    /// Rule match count, classifier confidence, or 0 for `Default`.
    pub score: f64,
}

/// Maps `(query, domain)` to an intent of that domain.
pub struct IntentRouter {
    catalog: Arc<DomainCatalog>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    default_domain: String,
    fallback_to_default: bool,
}

impl IntentRouter {
    pub fn new(catalog: Arc<DomainCatalog>, default_domain: impl Into<String>) -> Self {
        Self {
            catalog,
            classifier: None,
            default_domain: default_domain.into(),
            fallback_to_default: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Route unknown domains to the default domain instead of failing.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_default = enabled;
        self
    }

    pub fn catalog(&self) -> &Arc<DomainCatalog> {
        &self.catalog
    }

    pub fn default_domain(&self) -> &str {
        &self.default_domain
    }

    /// Resolve the domain, then the intent.
    ///
    /// Rules first (highest score, ties to the first declared intent), then
    /// the delegate classifier, then the domain's default intent.
    pub async fn route(&self, query: &str, domain: Option<&str>) -> Result<RouteDecision> {
        let domain = self.resolve_domain(domain)?;

        if let Some((intent, score, matched)) = best_rule_match(query, domain) {
            info!(domain = %domain.name, intent = %intent.name, score, matched = %matched, "Rule-based intent matched");
            return Ok(decision(domain, intent, RouteMethod::Rule, Some(matched), score as f64));
        }

        if let Some(ref classifier) = self.classifier {
            match classifier.classify(query, domain).await {
                Ok(Some(c)) => match domain.intent(&c.intent) {
                    Some(intent) => {
                        info!(domain = %domain.name, intent = %intent.name, confidence = c.confidence, "Classifier matched intent");
                        return Ok(decision(domain, intent, RouteMethod::Classifier, None, c.confidence));
                    }
                    None => {
                        warn!(domain = %domain.name, intent = %c.intent, "Classifier proposed an unknown intent, ignoring");
                    }
                },
                Ok(None) => debug!(domain = %domain.name, "Classifier made no proposal"),
                Err(e) => warn!(domain = %domain.name, error = %e, "Intent classifier failed"),
            }
        }

        let default = domain
            .default_intent
            .as_deref()
            .and_then(|name| domain.intent(name))
            .ok_or_else(|| SwitchyardError::UnknownIntent {
                domain: domain.name.clone(),
            })?;
        info!(domain = %domain.name, intent = %default.name, "No intent matched, using default intent");
        Ok(decision(domain, default, RouteMethod::Default, None, 0.0))
    }

    fn resolve_domain(&self, requested: Option<&str>) -> Result<&DomainEntry> {
        let name = requested.unwrap_or(&self.default_domain);
        if let Some(domain) = self.catalog.domain(name) {
            return Ok(domain);
        }
        if self.fallback_to_default && name != self.default_domain {
            if let Some(domain) = self.catalog.domain(&self.default_domain) {
                warn!(domain = %name, default = %self.default_domain, "Unknown domain, falling back to default");
                return Ok(domain);
            }
        }
        Err(SwitchyardError::UnknownDomain(name.to_string()))
    }
}

fn decision(
    domain: &DomainEntry,
    intent: &IntentEntry,
    method: RouteMethod,
    matched: Option<String>,
    score: f64,
) -> RouteDecision {
    RouteDecision {
        domain: domain.name.clone(),
        intent: intent.name.clone(),
        graph: intent.graph.clone(),
        method,
        matched,
        score,
    }
}

/// Count matching rules for one intent; returns the count and the first match.
fn score_intent(query_lower: &str, query: &str, intent: &IntentEntry) -> (usize, Option<String>) {
    let mut score = 0;
    let mut first = None;
    for keyword in &intent.keywords {
        if !keyword.is_empty() && query_lower.contains(keyword.as_str()) {
            score += 1;
            first.get_or_insert_with(|| keyword.clone());
        }
    }
    for pattern in &intent.patterns {
        if pattern.is_match(query) {
            score += 1;
            first.get_or_insert_with(|| pattern.as_str().trim_start_matches("(?i)").to_string());
        }
    }
    (score, first)
}

fn best_rule_match<'d>(query: &str, domain: &'d DomainEntry) -> Option<(&'d IntentEntry, usize, String)> {
    let query_lower = query.to_lowercase();
    let mut best: Option<(&IntentEntry, usize, String)> = None;
    for intent in &domain.intents {
        let (score, matched) = score_intent(&query_lower, query, intent);
        let Some(matched) = matched else { continue };
        debug!(intent = %intent.name, score, "Intent rule score");
        // Strictly greater keeps the first declared intent on ties.
        if best.as_ref().map_or(true, |(_, s, _)| score > *s) {
            best = Some((intent, score, matched));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use crate::graph::DomainFile;
    use futures::future::BoxFuture;
    use switchyard_core::registry::UnitRegistry;
    use switchyard_test_utils::{register_mocks, REFLECTION_DOMAIN};

    const SHOP: &str = r#"
domain = "shop"

[[intents]]
name = "order"
keywords = ["buy", "order"]

[[intents]]
name = "refund"
keywords = ["refund", "order"]
patterns = ["money\\s+back"]

[[workflows]]
name = "order"

[[workflows.steps]]
name = "s"
kind = "agent"
unit = "EchoAgent"

[[workflows]]
name = "refund"

[[workflows.steps]]
name = "s"
kind = "agent"
unit = "EchoAgent"
"#;

    fn catalog() -> Arc<DomainCatalog> {
        let registry = UnitRegistry::new();
        register_mocks(&registry).unwrap();
        registry.freeze().unwrap();
        let files = vec![
            DomainFile::from_toml(SHOP).unwrap(),
            DomainFile::from_toml(REFLECTION_DOMAIN).unwrap(),
        ];
        Arc::new(DomainCatalog::from_files(files, &registry).unwrap())
    }

    struct FixedClassifier(&'static str);

    impl IntentClassifier for FixedClassifier {
        fn classify<'a>(
            &'a self,
            _query: &'a str,
            _domain: &'a DomainEntry,
        ) -> BoxFuture<'a, Result<Option<Classification>>> {
            Box::pin(async move {
                Ok(Some(Classification {
                    intent: self.0.to_string(),
                    confidence: 0.6,
                }))
            })
        }
    }

    #[tokio::test]
    async fn test_highest_score_wins() {
        let router = IntentRouter::new(catalog(), "shop");
        let d = router.route("I want my MONEY  back for this order", None).await.unwrap();
        assert_eq!(d.intent, "refund");
        assert_eq!(d.method, RouteMethod::Rule);
        assert_eq!(d.score, 2.0);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_declared() {
        let router = IntentRouter::new(catalog(), "shop");
        let d = router.route("where is my order", Some("shop")).await.unwrap();
        assert_eq!(d.intent, "order");
        assert_eq!(d.matched.as_deref(), Some("order"));
    }

    #[tokio::test]
    async fn test_default_intent_and_unknown_intent() {
        let router = IntentRouter::new(catalog(), "shop");
        let d = router.route("something else", Some("loop")).await.unwrap();
        assert_eq!(d.intent, "refine");
        assert_eq!(d.method, RouteMethod::Default);

        let err = router.route("something else", Some("shop")).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownIntent { ref domain } if domain == "shop"));
    }

    #[tokio::test]
    async fn test_classifier_used_only_without_rule_match() {
        let router = IntentRouter::new(catalog(), "shop")
            .with_classifier(Arc::new(FixedClassifier("refund")));
        let d = router.route("hmm", None).await.unwrap();
        assert_eq!(d.intent, "refund");
        assert_eq!(d.method, RouteMethod::Classifier);

        let d = router.route("buy", None).await.unwrap();
        assert_eq!(d.intent, "order");
        assert_eq!(d.method, RouteMethod::Rule);
    }

    #[tokio::test]
    async fn test_classifier_unknown_intent_ignored() {
        let router = IntentRouter::new(catalog(), "loop")
            .with_classifier(Arc::new(FixedClassifier("nonsense")));
        let d = router.route("hmm", None).await.unwrap();
        assert_eq!(d.intent, "refine");
        assert_eq!(d.method, RouteMethod::Default);
    }

    #[tokio::test]
    async fn test_unknown_domain() {
        let strict = IntentRouter::new(catalog(), "shop");
        let err = strict.route("buy", Some("nowhere")).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownDomain(ref d) if d == "nowhere"));

        let lenient = IntentRouter::new(catalog(), "shop").with_fallback(true);
        let d = lenient.route("buy", Some("nowhere")).await.unwrap();
        assert_eq!(d.domain, "shop");
    }
}
