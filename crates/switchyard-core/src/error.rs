use thiserror::Error;

use crate::types::UnitKind;

#[derive(Debug, Error)]
pub enum SwitchyardError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Registry errors
    #[error("Duplicate registration: {kind} '{name}' is already registered")]
    DuplicateRegistration { kind: UnitKind, name: String },

    #[error("Registry is frozen; cannot register {kind} '{name}'")]
    RegistryFrozen { kind: UnitKind, name: String },

    #[error("Registry has not been frozen yet")]
    RegistryNotFrozen,

    #[error("Unknown unit: {kind} '{name}'")]
    UnknownUnit { kind: UnitKind, name: String },

    // Routing errors
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("No intent matched in domain '{domain}' and no default intent is configured")]
    UnknownIntent { domain: String },

    // Compile errors
    #[error("Invalid workflow '{workflow}': {reason}")]
    GraphValidation { workflow: String, reason: String },

    // Execution errors
    #[error("Unit execution failed: {unit}: {message}")]
    UnitExecution { unit: String, message: String },

    #[error("Unit timeout after {timeout_secs}s: {unit}")]
    UnitTimeout { unit: String, timeout_secs: u64 },

    #[error("Step '{step}' failed: {source}")]
    Execution {
        step: String,
        #[source]
        source: Box<SwitchyardError>,
    },

    // Storage errors
    #[error("State store error: {0}")]
    State(String),

    #[error("Database error: {0}")]
    Database(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwitchyardError {
    /// Shorthand for a unit-reported failure.
    pub fn unit(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitExecution {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a workflow validation failure.
    pub fn invalid_graph(workflow: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GraphValidation {
            workflow: workflow.into(),
            reason: reason.into(),
        }
    }

    /// Name of the failing step, if this error came out of a graph run.
    pub fn failing_step(&self) -> Option<&str> {
        match self {
            Self::Execution { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether this is a timeout, looking through step wrappers.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::UnitTimeout { .. } => true,
            Self::Execution { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchyardError>;
