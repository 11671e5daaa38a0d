//! Orchestrator: the one entry point a transport layer calls.
//!
//! `handle` opens the session, routes the query, runs the compiled graph with
//! a fresh execution context, appends the turn to the transcript, and returns
//! a [`ResultEnvelope`]. Internal errors are translated exactly once into an
//! [`OrchestratorError`] with a stable code and a fixed message; the full
//! internal error is logged and kept as the error's source.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use switchyard_core::config::AppConfig;
use switchyard_core::context::ExecutionContext;
use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::registry::{UnitFactory, UnitRegistry};
use switchyard_core::state::StateStore;
use switchyard_core::traits::LlmClient;
use switchyard_core::types::{SessionId, Turn, UnitOutput};

use crate::catalog::DomainCatalog;
use crate::classifier::LlmIntentClassifier;
use crate::graph::GraphExecutor;
use crate::router::{IntentRouter, RouteMethod};

/// Stable external error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ConfigurationError,
    UnknownDomain,
    UnknownIntent,
    UnknownUnit,
    GraphInvalid,
    UnitFailed,
    UnitTimeout,
    StateUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::ConfigurationError => "configuration_error",
            Self::UnknownDomain => "unknown_domain",
            Self::UnknownIntent => "unknown_intent",
            Self::UnknownUnit => "unknown_unit",
            Self::GraphInvalid => "graph_invalid",
            Self::UnitFailed => "unit_failed",
            Self::UnitTimeout => "unit_timeout",
            Self::StateUnavailable => "state_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    /// Caller-facing message. Never carries internal detail.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "The request is invalid.",
            Self::ConfigurationError => "The service is not configured correctly.",
            Self::UnknownDomain => "The requested domain does not exist.",
            Self::UnknownIntent => "The request could not be matched to an intent.",
            Self::UnknownUnit => "A required capability is not available.",
            Self::GraphInvalid => "The workflow for this request is invalid.",
            Self::UnitFailed => "A workflow step failed.",
            Self::UnitTimeout => "A workflow step timed out.",
            Self::StateUnavailable => "Session state is temporarily unavailable.",
            Self::InternalError => "An internal error occurred.",
        }
    }

    /// Classify an internal error, looking through step wrappers.
    pub fn from_error(err: &SwitchyardError) -> Self {
        match err {
            SwitchyardError::InvalidRequest(_) => Self::InvalidRequest,
            SwitchyardError::Config(_)
            | SwitchyardError::ConfigNotFound(_)
            | SwitchyardError::DuplicateRegistration { .. }
            | SwitchyardError::RegistryFrozen { .. }
            | SwitchyardError::RegistryNotFrozen => Self::ConfigurationError,
            SwitchyardError::UnknownDomain(_) => Self::UnknownDomain,
            SwitchyardError::UnknownIntent { .. } => Self::UnknownIntent,
            SwitchyardError::UnknownUnit { .. } => Self::UnknownUnit,
            SwitchyardError::GraphValidation { .. } => Self::GraphInvalid,
            SwitchyardError::UnitExecution { .. } => Self::UnitFailed,
            SwitchyardError::UnitTimeout { .. } => Self::UnitTimeout,
            SwitchyardError::Execution { source, .. } => Self::from_error(source),
            SwitchyardError::State(_) | SwitchyardError::Database(_) => Self::StateUnavailable,
            SwitchyardError::Llm(_) | SwitchyardError::Io(_) | SwitchyardError::Json(_) => {
                Self::InternalError
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned to callers of [`Orchestrator::handle`].
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OrchestratorError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<SwitchyardError>,
}

impl OrchestratorError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            source: None,
        }
    }

    /// Failing step of the underlying error, for diagnostics.
    pub fn failing_step(&self) -> Option<&str> {
        self.source.as_ref().and_then(|e| e.failing_step())
    }

    /// Serializable `{code, message}` body.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code, "message": self.message })
    }
}

impl From<SwitchyardError> for OrchestratorError {
    fn from(err: SwitchyardError) -> Self {
        let code = ErrorCode::from_error(&err);
        Self {
            code,
            message: code.message().to_string(),
            source: Some(err),
        }
    }
}

/// Run diagnostics attached to every envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub llm_used: bool,
    /// Visited steps in order, repeats included.
    pub steps: Vec<String>,
    pub forced_exits: usize,
    pub route: RouteMethod,
    pub elapsed_ms: u64,
}

/// Successful response for one request.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub session_id: SessionId,
    pub domain: String,
    pub intent: String,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub diagnostics: Diagnostics,
}

/// A routable domain, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DomainInfo {
    pub name: String,
    pub default_intent: Option<String>,
    pub intents: Vec<String>,
}

/// The final step's data plus its reply text, if any.
fn envelope_result(output: &UnitOutput) -> serde_json::Value {
    let mut obj = output.data.clone();
    if let Some(ref reply) = output.reply {
        obj.entry("reply")
            .or_insert_with(|| serde_json::Value::String(reply.clone()));
    }
    serde_json::Value::Object(obj)
}

pub struct Orchestrator {
    router: IntentRouter,
    store: Arc<StateStore>,
    units: UnitFactory,
    unit_timeout_secs: u64,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(router: IntentRouter, store: Arc<StateStore>, units: UnitFactory) -> Self {
        Self {
            router,
            store,
            units,
            unit_timeout_secs: 30,
            history_limit: 10,
        }
    }

    /// Wire an orchestrator from configuration. Loads and compiles every
    /// domain in `domains_dir`; the registry must already be frozen.
    pub fn from_config(
        config: &AppConfig,
        domains_dir: &Path,
        registry: Arc<UnitRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        store: Arc<StateStore>,
    ) -> Result<Self> {
        let catalog = Arc::new(DomainCatalog::load_dir(domains_dir, &registry)?);
        if catalog.domain(&config.engine.default_domain).is_none() {
            return Err(SwitchyardError::Config(format!(
                "default domain '{}' is not defined in {}",
                config.engine.default_domain,
                domains_dir.display()
            )));
        }

        let mut router = IntentRouter::new(catalog, config.engine.default_domain.clone())
            .with_fallback(config.engine.fallback_to_default_domain);
        if config.engine.use_llm_classifier {
            match llm {
                Some(ref llm) => {
                    router = router.with_classifier(Arc::new(LlmIntentClassifier::new(llm.clone())));
                }
                None => tracing::warn!("use_llm_classifier is set but no LLM client is available"),
            }
        }

        Ok(Self::new(router, store, UnitFactory::new(registry, llm))
            .with_unit_timeout(config.engine.unit_timeout_secs)
            .with_history_limit(config.state.history_limit))
    }

    pub fn with_unit_timeout(mut self, secs: u64) -> Self {
        self.unit_timeout_secs = secs;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Handle one request.
    pub async fn handle(
        &self,
        query: &str,
        domain: Option<&str>,
        session: Option<SessionId>,
    ) -> std::result::Result<ResultEnvelope, OrchestratorError> {
        let session_id = session.unwrap_or_default();
        self.run(query, domain, &session_id).await.map_err(|e| {
            let err = OrchestratorError::from(e);
            if let Some(ref source) = err.source {
                error!(
                    session = %session_id,
                    domain = domain.unwrap_or(self.router.default_domain()),
                    code = %err.code,
                    step = err.failing_step().unwrap_or("-"),
                    error = %source,
                    "Request failed"
                );
            }
            err
        })
    }

    async fn run(&self, query: &str, domain: Option<&str>, session_id: &SessionId) -> Result<ResultEnvelope> {
        let start = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(SwitchyardError::InvalidRequest("query is empty".into()));
        }

        let session = self.store.open(session_id).await?;
        let route = self.router.route(query, domain).await?;
        info!(
            session = %session_id,
            domain = %route.domain,
            intent = %route.intent,
            method = %route.method,
            "Request routed"
        );

        let mut ctx = ExecutionContext::new(
            session,
            route.domain.clone(),
            route.intent.clone(),
            query,
            self.units.clone(),
            self.unit_timeout_secs,
        );
        let outcome = GraphExecutor::new(route.graph.clone()).run(&mut ctx).await?;

        let result = envelope_result(&outcome.output);
        self.store
            .append_turn(
                session_id,
                Turn::new(query, route.domain.clone(), route.intent.clone(), result.clone()),
            )
            .await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            session = %session_id,
            intent = %route.intent,
            steps = outcome.path.len(),
            llm_used = outcome.llm_used,
            elapsed_ms,
            "Request complete"
        );

        Ok(ResultEnvelope {
            session_id: session_id.clone(),
            domain: route.domain,
            intent: route.intent,
            result,
            timestamp: Utc::now(),
            diagnostics: Diagnostics {
                llm_used: outcome.llm_used,
                steps: outcome.path,
                forced_exits: outcome.forced_exits,
                route: route.method,
                elapsed_ms,
            },
        })
    }

    /// Most recent turns of a session, oldest first.
    pub async fn history(
        &self,
        session: &SessionId,
        limit: Option<usize>,
    ) -> std::result::Result<Vec<Turn>, OrchestratorError> {
        Ok(self
            .store
            .history(session, limit.unwrap_or(self.history_limit))
            .await?)
    }

    /// Short text summary of the session's recent turns. Empty for unknown sessions.
    pub async fn summarize(&self, session: &SessionId) -> std::result::Result<String, OrchestratorError> {
        Ok(self
            .store
            .load(session)
            .await?
            .map(|s| s.summary(self.history_limit, 500))
            .unwrap_or_default())
    }

    /// Drop a session. Returns whether it existed.
    pub async fn end_session(&self, session: &SessionId) -> std::result::Result<bool, OrchestratorError> {
        Ok(self.store.delete(session).await?)
    }

    /// Routable domains and their intents, sorted by domain name.
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.router
            .catalog()
            .domains()
            .map(|d| DomainInfo {
                name: d.name.clone(),
                default_intent: d.default_intent.clone(),
                intents: d.intent_names().into_iter().map(String::from).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DomainFile;
    use switchyard_test_utils::{register_mocks, REFLECTION_DOMAIN};

    fn orchestrator() -> Orchestrator {
        let registry = UnitRegistry::new();
        register_mocks(&registry).unwrap();
        registry.freeze().unwrap();
        let registry = Arc::new(registry);
        let file = DomainFile::from_toml(REFLECTION_DOMAIN).unwrap();
        let catalog = Arc::new(DomainCatalog::from_files(vec![file], &registry).unwrap());
        Orchestrator::new(
            IntentRouter::new(catalog, "loop"),
            Arc::new(StateStore::in_memory()),
            UnitFactory::new(registry, None),
        )
        .with_unit_timeout(5)
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::UnknownIntent.as_str(), "unknown_intent");
        let wrapped = SwitchyardError::Execution {
            step: "fetch".into(),
            source: Box::new(SwitchyardError::UnitTimeout {
                unit: "SlowTool".into(),
                timeout_secs: 1,
            }),
        };
        assert_eq!(ErrorCode::from_error(&wrapped), ErrorCode::UnitTimeout);
        assert_eq!(
            ErrorCode::from_error(&SwitchyardError::Database("locked".into())),
            ErrorCode::StateUnavailable
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::GraphInvalid).unwrap(),
            serde_json::json!("graph_invalid")
        );
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let err = orchestrator().handle("   ", None, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_handle_reflection_run() {
        let orch = orchestrator();
        let sid = SessionId::from_string("orch");
        let env = orch.handle("refine my draft", None, Some(sid.clone())).await.unwrap();

        assert_eq!(env.domain, "loop");
        assert_eq!(env.intent, "refine");
        assert_eq!(env.result["reply"], "echo: refine my draft");
        assert_eq!(env.diagnostics.forced_exits, 1);
        assert_eq!(env.diagnostics.route, RouteMethod::Rule);
        assert_eq!(env.diagnostics.steps.first().map(String::as_str), Some("work"));

        let history = orch.history(&sid, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].intent, "refine");
        assert!(orch.summarize(&sid).await.unwrap().contains("echo"));
    }

    #[tokio::test]
    async fn test_failure_message_hides_step() {
        let orch = orchestrator();
        let err = orch.handle("explode", None, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnitFailed);
        assert_eq!(err.failing_step(), Some("boom"));
        assert!(!err.message.contains("boom"));
        assert!(!err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_domain_code() {
        let err = orchestrator().handle("hi", Some("nowhere"), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownDomain);
    }

    #[tokio::test]
    async fn test_end_session_and_domains() {
        let orch = orchestrator();
        let sid = SessionId::from_string("bye");
        orch.handle("refine", None, Some(sid.clone())).await.unwrap();
        assert!(orch.end_session(&sid).await.unwrap());
        assert!(!orch.end_session(&sid).await.unwrap());
        assert!(orch.summarize(&sid).await.unwrap().is_empty());

        let domains = orch.domains();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].intents, vec!["refine", "explode"]);
    }
}
