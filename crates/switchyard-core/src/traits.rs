use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::types::{SessionId, SessionState, Turn, UnitOutput};

/// Capability unit: the one executable contract shared by nodes, agents and tools.
///
/// A fresh instance is built for every step invocation, so an implementation
/// may keep per-invocation state in `self` (behind interior mutability) but
/// nothing survives past `post`. Anything longer-lived belongs in session state.
pub trait Unit: Send + Sync + 'static {
    /// Symbolic name the unit is registered under.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Setup hook, run before `execute`.
    fn pre<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// Do the work. The only phase allowed to fail with a domain error.
    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<UnitOutput>>;

    /// Teardown hook, run after `execute` on every exit path.
    fn post<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// Preferred timeout in seconds; `None` defers to the engine default.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// LLM client, the provider behind agents and the delegate classifier.
pub trait LlmClient: Send + Sync + 'static {
    /// Provider name for logs.
    fn name(&self) -> &str {
        "llm"
    }

    /// Send a single prompt and return the full completion text.
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// State backend: persistence for session state.
///
/// Implementations only need per-call atomicity; per-session serialization
/// is provided by [`crate::state::StateStore`].
pub trait StateBackend: Send + Sync + 'static {
    /// Load a session, creating it if absent, and bump its last-access time.
    fn load_or_create(&self, sid: &SessionId) -> BoxFuture<'_, Result<SessionState>>;

    /// Load a session without touching it.
    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<SessionState>>>;

    /// Upsert key/value entries.
    fn set_values(
        &self,
        sid: &SessionId,
        values: Vec<(String, serde_json::Value)>,
    ) -> BoxFuture<'_, Result<()>>;

    /// Append one turn to the transcript.
    fn append_turn(&self, sid: &SessionId, turn: Turn) -> BoxFuture<'_, Result<()>>;

    /// Most recent turns, oldest first.
    fn recent_turns(&self, sid: &SessionId, limit: usize) -> BoxFuture<'_, Result<Vec<Turn>>>;

    /// Remove a session entirely. Returns whether it existed.
    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>>;

    /// Sessions whose last access is older than `cutoff`.
    fn idle_sessions(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<SessionId>>>;
}
