use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::registry::UnitFactory;
use crate::state::SessionHandle;
use crate::types::{SessionId, UnitKind, UnitOutput};
use crate::unit::invoke;

/// Per-run mutable record handed to every unit.
///
/// Owned by exactly one graph run. Session state is reached through the
/// [`SessionHandle`], which sees the snapshot taken when the run started
/// plus this run's own writes.
pub struct ExecutionContext {
    domain: String,
    intent: String,
    query: String,
    results: BTreeMap<String, UnitOutput>,
    previous: Option<(String, UnitOutput)>,
    input: serde_json::Value,
    session: SessionHandle,
    units: UnitFactory,
    default_timeout_secs: u64,
}

impl ExecutionContext {
    pub fn new(
        session: SessionHandle,
        domain: impl Into<String>,
        intent: impl Into<String>,
        query: impl Into<String>,
        units: UnitFactory,
        default_timeout_secs: u64,
    ) -> Self {
        let query = query.into();
        Self {
            domain: domain.into(),
            intent: intent.into(),
            input: serde_json::json!({ "query": query }),
            query,
            results: BTreeMap::new(),
            previous: None,
            session,
            units,
            default_timeout_secs,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.session_id()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    pub fn units(&self) -> &UnitFactory {
        &self.units
    }

    /// Latest result recorded for a step.
    pub fn result(&self, step: &str) -> Option<&UnitOutput> {
        self.results.get(step)
    }

    pub fn results(&self) -> &BTreeMap<String, UnitOutput> {
        &self.results
    }

    /// The step that ran immediately before the current one, with its output.
    pub fn previous(&self) -> Option<(&str, &UnitOutput)> {
        self.previous.as_ref().map(|(s, o)| (s.as_str(), o))
    }

    /// Record a step result. Re-running a step (reflection loops) replaces it.
    pub fn record(&mut self, step: &str, output: UnitOutput) {
        self.results.insert(step.to_string(), output.clone());
        self.previous = Some((step.to_string(), output));
    }

    /// Input for the current invocation.
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    pub fn set_input(&mut self, input: serde_json::Value) {
        self.input = input;
    }

    pub fn state(&self) -> &SessionHandle {
        &self.session
    }

    pub fn state_mut(&mut self) -> &mut SessionHandle {
        &mut self.session
    }

    /// Read a session value (staged, then committed-in-run, then snapshot).
    pub fn get_state(&self, key: &str) -> Option<&serde_json::Value> {
        self.session.get(key)
    }

    /// Stage a session write; it is committed when the current step succeeds.
    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.session.set(key, value);
    }

    /// Build and invoke another registered unit with the given input.
    ///
    /// This is how agents reach nodes and tools at run time. The previous
    /// input is restored afterwards whether or not the call succeeded.
    pub fn call<'a>(
        &'a mut self,
        kind: UnitKind,
        name: &'a str,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<UnitOutput>> {
        Box::pin(async move {
            let unit = self.units.build(kind, name, None, &serde_json::Value::Null)?;
            let timeout = unit.effective_timeout(None, self.default_timeout_secs);
            let saved = std::mem::replace(&mut self.input, input);
            let result = invoke(&unit, self, timeout).await;
            self.input = saved;
            result
        })
    }

    /// Shorthand for [`ExecutionContext::call`] on a tool.
    pub fn call_tool<'a>(
        &'a mut self,
        name: &'a str,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<UnitOutput>> {
        self.call(UnitKind::Tool, name, input)
    }
}
