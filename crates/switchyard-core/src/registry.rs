//! Unit registry. Maps `(kind, name)` to unit constructors.
//!
//! The registry has two phases. During startup the host registers every
//! unit it provides, then calls [`UnitRegistry::freeze`]. After that the
//! table is read-only and lookups go straight to a `OnceLock` with no
//! locking; any late `register` call fails with `RegistryFrozen`, and any
//! lookup before the freeze fails with `RegistryNotFrozen`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info};

use crate::error::{Result, SwitchyardError};
use crate::traits::{LlmClient, Unit};
use crate::types::UnitKind;
use crate::unit::CapabilityUnit;

/// Everything a constructor may use to build one unit instance.
#[derive(Default)]
pub struct UnitArgs {
    /// Agent bound to the step, already constructed.
    pub agent: Option<CapabilityUnit>,
    /// LLM provider, when the host configured one.
    pub llm: Option<Arc<dyn LlmClient>>,
    /// Free-form step parameters from the workflow source.
    pub params: serde_json::Value,
}

impl UnitArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Read a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Read an unsigned integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

/// Builds a fresh unit instance.
pub type Constructor = Arc<dyn Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync>;

/// A registered unit type.
#[derive(Clone)]
pub struct UnitDescriptor {
    pub kind: UnitKind,
    pub name: String,
    constructor: Constructor,
}

impl UnitDescriptor {
    pub fn construct(&self, args: UnitArgs) -> Result<Box<dyn Unit>> {
        (self.constructor)(args)
    }
}

impl fmt::Debug for UnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

type Table = HashMap<(UnitKind, String), UnitDescriptor>;

/// Registry of unit constructors with a register-then-freeze lifecycle.
pub struct UnitRegistry {
    pending: Mutex<Option<Table>>,
    table: OnceLock<Table>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Some(HashMap::new())),
            table: OnceLock::new(),
        }
    }

    /// Register a constructor under `(kind, name)`.
    pub fn register<F>(&self, kind: UnitKind, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| SwitchyardError::Config(e.to_string()))?;

        let table = match pending.as_mut() {
            Some(table) if self.table.get().is_none() => table,
            _ => return Err(SwitchyardError::RegistryFrozen { kind, name }),
        };

        let key = (kind, name.clone());
        if table.contains_key(&key) {
            return Err(SwitchyardError::DuplicateRegistration { kind, name });
        }

        debug!(kind = %kind, name = %name, "Unit registered");
        table.insert(
            key,
            UnitDescriptor {
                kind,
                name,
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    pub fn register_node<F>(&self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync + 'static,
    {
        self.register(UnitKind::Node, name, constructor)
    }

    pub fn register_agent<F>(&self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync + 'static,
    {
        self.register(UnitKind::Agent, name, constructor)
    }

    pub fn register_tool<F>(&self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync + 'static,
    {
        self.register(UnitKind::Tool, name, constructor)
    }

    /// End the registration phase. Calling it again is a no-op.
    pub fn freeze(&self) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| SwitchyardError::Config(e.to_string()))?;
        if let Some(table) = pending.take() {
            info!(units = table.len(), "Unit registry frozen");
            // Only this branch ever sets the cell, and `take` makes it run once.
            let _ = self.table.set(table);
        }
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.table.get().is_some()
    }

    fn frozen(&self) -> Result<&Table> {
        self.table.get().ok_or(SwitchyardError::RegistryNotFrozen)
    }

    /// Look up a descriptor.
    pub fn resolve(&self, kind: UnitKind, name: &str) -> Result<&UnitDescriptor> {
        self.frozen()?
            .get(&(kind, name.to_string()))
            .ok_or_else(|| SwitchyardError::UnknownUnit {
                kind,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, kind: UnitKind, name: &str) -> bool {
        self.resolve(kind, name).is_ok()
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: UnitKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .frozen()
            .map(|t| {
                t.keys()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, n)| n.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Build a fresh instance of a registered unit.
    pub fn instantiate(&self, kind: UnitKind, name: &str, args: UnitArgs) -> Result<CapabilityUnit> {
        let unit = self.resolve(kind, name)?.construct(args)?;
        Ok(CapabilityUnit::new(kind, unit))
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry plus shared dependencies, used to build units for a step.
#[derive(Clone)]
pub struct UnitFactory {
    registry: Arc<UnitRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl UnitFactory {
    pub fn new(registry: Arc<UnitRegistry>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { registry, llm }
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    pub fn llm(&self) -> Option<&Arc<dyn LlmClient>> {
        self.llm.as_ref()
    }

    /// Build the unit for a step, constructing its bound agent first.
    pub fn build(
        &self,
        kind: UnitKind,
        name: &str,
        agent: Option<&str>,
        params: &serde_json::Value,
    ) -> Result<CapabilityUnit> {
        let agent = match agent {
            Some(agent_name) => Some(self.registry.instantiate(
                UnitKind::Agent,
                agent_name,
                self.args(serde_json::Value::Null, None),
            )?),
            None => None,
        };
        self.registry
            .instantiate(kind, name, self.args(params.clone(), agent))
    }

    fn args(&self, params: serde_json::Value, agent: Option<CapabilityUnit>) -> UnitArgs {
        UnitArgs {
            agent,
            llm: self.llm.clone(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::types::UnitOutput;
    use futures::future::BoxFuture;

    struct Fixed(&'static str);

    impl Unit for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn execute<'a>(
            &'a self,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<UnitOutput>> {
            Box::pin(async move { Ok(UnitOutput::new().with("name", self.0.into())) })
        }
    }

    fn fixed(name: &'static str) -> impl Fn(UnitArgs) -> Result<Box<dyn Unit>> + Send + Sync {
        move |_| Ok(Box::new(Fixed(name)) as Box<dyn Unit>)
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = UnitRegistry::new();
        registry.register_node("Greeter", fixed("Greeter")).unwrap();
        registry.register_tool("Greeter", fixed("GreeterTool")).unwrap();
        registry.freeze().unwrap();

        assert!(registry.contains(UnitKind::Node, "Greeter"));
        assert!(registry.contains(UnitKind::Tool, "Greeter"));
        assert!(!registry.contains(UnitKind::Agent, "Greeter"));
        assert_eq!(registry.names(UnitKind::Node), vec!["Greeter"]);

        let unit = registry
            .instantiate(UnitKind::Node, "Greeter", UnitArgs::new())
            .unwrap();
        assert_eq!(unit.name(), "Greeter");
        assert_eq!(unit.kind(), UnitKind::Node);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = UnitRegistry::new();
        registry.register_agent("Helper", fixed("a")).unwrap();
        let err = registry.register_agent("Helper", fixed("b")).unwrap_err();
        assert!(matches!(
            err,
            SwitchyardError::DuplicateRegistration { kind: UnitKind::Agent, .. }
        ));
    }

    #[test]
    fn test_register_after_freeze_fails() {
        let registry = UnitRegistry::new();
        registry.freeze().unwrap();
        let err = registry.register_node("Late", fixed("Late")).unwrap_err();
        assert!(matches!(err, SwitchyardError::RegistryFrozen { .. }));
        // a second freeze is harmless
        registry.freeze().unwrap();
        assert!(registry.is_frozen());
    }

    #[test]
    fn test_resolve_before_freeze_fails() {
        let registry = UnitRegistry::new();
        registry.register_node("Early", fixed("Early")).unwrap();
        let err = registry.resolve(UnitKind::Node, "Early").unwrap_err();
        assert!(matches!(err, SwitchyardError::RegistryNotFrozen));
    }

    #[test]
    fn test_unknown_unit() {
        let registry = UnitRegistry::new();
        registry.freeze().unwrap();
        let err = registry.resolve(UnitKind::Tool, "Missing").unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownUnit { kind: UnitKind::Tool, .. }));
    }

    #[test]
    fn test_factory_builds_bound_agent() {
        let registry = UnitRegistry::new();
        registry
            .register_node("Wrapper", |args: UnitArgs| {
                let agent = args
                    .agent
                    .map(|a| a.name().to_string())
                    .unwrap_or_default();
                Ok(Box::new(Fixed(if agent == "Inner" { "bound" } else { "unbound" }))
                    as Box<dyn Unit>)
            })
            .unwrap();
        registry.register_agent("Inner", fixed("Inner")).unwrap();
        registry.freeze().unwrap();

        let factory = UnitFactory::new(Arc::new(registry), None);
        let unit = factory
            .build(UnitKind::Node, "Wrapper", Some("Inner"), &serde_json::Value::Null)
            .unwrap();
        assert_eq!(unit.name(), "bound");

        let err = factory
            .build(UnitKind::Node, "Wrapper", Some("Nope"), &serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownUnit { kind: UnitKind::Agent, .. }));
    }
}
