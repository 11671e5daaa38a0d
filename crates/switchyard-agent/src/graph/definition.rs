use serde::{Deserialize, Serialize};

use switchyard_core::config::expand_env_vars;
use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::types::UnitKind;

/// One `<domain>.toml` file: the intent catalog and the workflows it routes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainFile {
    pub domain: String,
    /// Intent used when no rule or classifier matches.
    #[serde(default)]
    pub default_intent: Option<String>,
    #[serde(default)]
    pub intents: Vec<IntentDef>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// An intent and the rules that select it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Case-insensitive substrings.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Case-insensitive regular expressions.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Workflow to run. Defaults to the intent name.
    #[serde(default)]
    pub workflow: Option<String>,
}

impl IntentDef {
    pub fn workflow_name(&self) -> &str {
        self.workflow.as_deref().unwrap_or(&self.name)
    }
}

/// Declarative workflow: ordered steps and ordered edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Entry step. Defaults to the first declared step.
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub edges: Vec<EdgeDescriptor>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            steps: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    pub fn edge(mut self, edge: EdgeDescriptor) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }
}

/// A step bound to one registered unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub name: String,
    pub kind: UnitKind,
    /// Registered unit name.
    pub unit: String,
    /// Agent handed to the unit's constructor.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, kind: UnitKind, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: unit.into(),
            agent: None,
            timeout_secs: None,
            params: serde_json::Value::Null,
        }
    }

    pub fn node(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::new(name, UnitKind::Node, unit)
    }

    pub fn agent(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::new(name, UnitKind::Agent, unit)
    }

    pub fn tool(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::new(name, UnitKind::Tool, unit)
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// A transition between two steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub from: String,
    pub to: String,
    /// Guard expression over the `from` step's result. No guard always passes.
    #[serde(default)]
    pub guard: Option<String>,
    /// Marks a bounded reflection edge.
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl EdgeDescriptor {
    /// Create an unguarded edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            max_iterations: None,
        }
    }

    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// Mark as a reflection edge traversed at most `max` times per run.
    pub fn reflect(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn is_reflection(&self) -> bool {
        self.max_iterations.is_some()
    }
}

impl DomainFile {
    /// Parse a domain file, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| SwitchyardError::Config(e.to_string()))
    }

    pub fn workflow(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.name == name)
    }
}
