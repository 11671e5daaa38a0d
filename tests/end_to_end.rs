use std::path::Path;
use std::sync::Arc;

use switchyard_agent::{ErrorCode, Orchestrator, RouteMethod};
use switchyard_core::config::AppConfig;
use switchyard_core::error::SwitchyardError;
use switchyard_core::registry::UnitRegistry;
use switchyard_core::state::StateStore;
use switchyard_core::types::SessionId;
use switchyard_memory::SqliteBackend;
use switchyard_test_utils::{register_mocks, write_domain, HELLO_DOMAIN, REFLECTION_DOMAIN};
use switchyard_units::builtin::greeting::{FAREWELL, GREETING};

fn registry() -> Arc<UnitRegistry> {
    let registry = UnitRegistry::new();
    switchyard_units::register_builtins(&registry).unwrap();
    register_mocks(&registry).unwrap();
    registry.freeze().unwrap();
    Arc::new(registry)
}

fn config(default_domain: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.default_domain = default_domain.to_string();
    config.engine.unit_timeout_secs = 5;
    config
}

fn orchestrator(dir: &Path, default_domain: &str, store: Arc<StateStore>) -> Orchestrator {
    Orchestrator::from_config(&config(default_domain), dir, registry(), None, store).unwrap()
}

#[tokio::test]
async fn test_hello_scenario() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "hello", HELLO_DOMAIN);
    let orch = orchestrator(dir.path(), "hello", Arc::new(StateStore::in_memory()));

    let env = orch.handle("hello there", Some("hello"), None).await.unwrap();
    assert_eq!(env.domain, "hello");
    assert_eq!(env.intent, "greet");
    assert_eq!(env.result, serde_json::json!({ "greeting": GREETING }));
    assert_eq!(env.diagnostics.route, RouteMethod::Rule);
    assert_eq!(env.diagnostics.steps, vec!["greet"]);
    assert!(!env.diagnostics.llm_used);

    let json = serde_json::to_value(&env).unwrap();
    assert_eq!(json["domain"], "hello");
    assert_eq!(json["diagnostics"]["route"], "rule");
    assert!(json["session_id"].is_string());
}

#[tokio::test]
async fn test_farewell_shares_greet_workflow() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "hello", HELLO_DOMAIN);
    let orch = orchestrator(dir.path(), "hello", Arc::new(StateStore::in_memory()));

    let env = orch.handle("ok goodbye", None, None).await.unwrap();
    assert_eq!(env.intent, "farewell");
    assert_eq!(env.result["greeting"], FAREWELL);
    assert_eq!(env.result["farewell"], true);
}

#[tokio::test]
async fn test_unknown_intent_without_default() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "hello", HELLO_DOMAIN);
    let orch = orchestrator(dir.path(), "hello", Arc::new(StateStore::in_memory()));

    let err = orch.handle("tell me about rust", None, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownIntent);
    assert_eq!(err.to_json()["code"], "unknown_intent");
}

#[tokio::test]
async fn test_runtime_failure_names_step() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "loop", REFLECTION_DOMAIN);
    let store = Arc::new(StateStore::in_memory());
    let orch = orchestrator(dir.path(), "loop", store.clone());
    let sid = SessionId::from_string("explode");

    let err = orch.handle("explode", None, Some(sid.clone())).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnitFailed);
    assert_eq!(err.failing_step(), Some("boom"));
    assert!(!err.message.contains("boom"));

    // The first step committed; the failing step's staged write did not.
    let state = store.load(&sid).await.unwrap().unwrap();
    assert_eq!(state.get("count"), Some(&serde_json::json!(1)));
    assert!(state.get("boom_staged").is_none());
    assert!(state.transcript.is_empty());
}

#[tokio::test]
async fn test_unregistered_unit_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(
        dir.path(),
        "broken",
        r#"
domain = "broken"

[[intents]]
name = "x"

[[workflows]]
name = "x"

[[workflows.steps]]
name = "only"
kind = "node"
unit = "NotRegistered"
"#,
    );
    let result = Orchestrator::from_config(
        &config("broken"),
        dir.path(),
        registry(),
        None,
        Arc::new(StateStore::in_memory()),
    );
    assert!(matches!(result, Err(SwitchyardError::GraphValidation { .. })));
}

#[tokio::test]
async fn test_missing_default_domain_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "loop", REFLECTION_DOMAIN);
    let result = Orchestrator::from_config(
        &config("hello"),
        dir.path(),
        registry(),
        None,
        Arc::new(StateStore::in_memory()),
    );
    assert!(matches!(result, Err(SwitchyardError::Config(_))));
}

#[tokio::test]
async fn test_reflection_bounded_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "loop", REFLECTION_DOMAIN);
    let orch = orchestrator(dir.path(), "loop", Arc::new(StateStore::in_memory()));

    let env = orch.handle("please refine", None, None).await.unwrap();
    assert_eq!(
        env.diagnostics.steps,
        vec!["work", "judge", "work", "judge", "work", "judge", "work", "judge", "done"]
    );
    assert_eq!(env.diagnostics.forced_exits, 1);
    assert_eq!(env.result["reply"], "echo: please refine");
}

#[tokio::test]
async fn test_shipped_hello_domain() {
    let domains = Path::new(env!("CARGO_MANIFEST_DIR")).join("domains");
    let orch = orchestrator(&domains, "hello", Arc::new(StateStore::in_memory()));
    let sid = SessionId::from_string("shipped");

    let env = orch.handle("hello there", None, Some(sid.clone())).await.unwrap();
    assert_eq!(env.intent, "greet");
    assert_eq!(env.result["greeting"], GREETING);

    // No LLM configured: the agent degrades and the reviewer assumes OK.
    let env = orch.handle("tell me about rust", None, Some(sid.clone())).await.unwrap();
    assert_eq!(env.intent, "chat");
    assert_eq!(env.diagnostics.route, RouteMethod::Default);
    assert_eq!(env.diagnostics.steps, vec!["answer", "review", "feedback"]);
    assert!(env.result["reply"]
        .as_str()
        .unwrap()
        .contains("You said: 'tell me about rust'"));
    assert_eq!(env.result["next_action"], "proceed");

    let env = orch.handle("recap please", None, Some(sid.clone())).await.unwrap();
    assert_eq!(env.intent, "recall");
    assert_eq!(env.result["count"], 2);
}

#[tokio::test]
async fn test_sqlite_backed_history() {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "hello", HELLO_DOMAIN);
    let backend = SqliteBackend::open(&dir.path().join("state.db")).unwrap();
    let store = Arc::new(StateStore::new(Arc::new(backend)));
    let orch = orchestrator(dir.path(), "hello", store);
    let sid = SessionId::from_string("persisted");

    orch.handle("hi", None, Some(sid.clone())).await.unwrap();
    orch.handle("bye", None, Some(sid.clone())).await.unwrap();

    let history = orch.history(&sid, None).await.unwrap();
    let intents: Vec<_> = history.iter().map(|t| t.intent.as_str()).collect();
    assert_eq!(intents, vec!["greet", "farewell"]);
    assert!(orch.summarize(&sid).await.unwrap().contains("Goodbye"));

    assert!(orch.end_session(&sid).await.unwrap());
    assert!(orch.history(&sid, None).await.unwrap().is_empty());
}
