use std::sync::Arc;

use switchyard_agent::Orchestrator;
use switchyard_core::config::AppConfig;
use switchyard_core::registry::UnitRegistry;
use switchyard_core::state::StateStore;
use switchyard_core::types::SessionId;
use switchyard_test_utils::{register_mocks, write_domain, REFLECTION_DOMAIN};

fn orchestrator(store: Arc<StateStore>) -> (tempfile::TempDir, Arc<Orchestrator>) {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), "loop", REFLECTION_DOMAIN);

    let registry = UnitRegistry::new();
    register_mocks(&registry).unwrap();
    registry.freeze().unwrap();

    let mut config = AppConfig::default();
    config.engine.default_domain = "loop".into();
    let orch =
        Orchestrator::from_config(&config, dir.path(), Arc::new(registry), None, store).unwrap();
    (dir, Arc::new(orch))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_are_isolated() {
    let store = Arc::new(StateStore::in_memory());
    let (_dir, orch) = orchestrator(store.clone());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let orch = orch.clone();
        tasks.push(tokio::spawn(async move {
            let sid = SessionId::from_string(&format!("user-{i}"));
            orch.handle("refine", None, Some(sid.clone())).await.unwrap();
            sid
        }));
    }

    for task in tasks {
        let sid = task.await.unwrap();
        let state = store.load(&sid).await.unwrap().unwrap();
        // One run visits `work` four times; nothing leaks across sessions.
        assert_eq!(state.get("count"), Some(&serde_json::json!(4)));
        assert_eq!(state.transcript.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_session_turns_not_lost() {
    let store = Arc::new(StateStore::in_memory());
    let (_dir, orch) = orchestrator(store.clone());
    let sid = SessionId::from_string("shared");

    let a = {
        let orch = orch.clone();
        let sid = sid.clone();
        tokio::spawn(async move { orch.handle("refine one", None, Some(sid)).await })
    };
    let b = {
        let orch = orch.clone();
        let sid = sid.clone();
        tokio::spawn(async move { orch.handle("refine two", None, Some(sid)).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let history = orch.history(&sid, Some(10)).await.unwrap();
    let mut queries: Vec<_> = history.iter().map(|t| t.query.clone()).collect();
    queries.sort();
    assert_eq!(queries, vec!["refine one", "refine two"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compiled_graphs_shared_across_runs() {
    let store = Arc::new(StateStore::in_memory());
    let (_dir, orch) = orchestrator(store);

    let first = orch.router().route("refine", None).await.unwrap();
    let second = orch.router().route("refine again", None).await.unwrap();
    assert!(Arc::ptr_eq(&first.graph, &second.graph));
}
