use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SwitchyardError;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three kinds of capability unit a step can be bound to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Node,
    Agent,
    Tool,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Node => "node",
            UnitKind::Agent => "agent",
            UnitKind::Tool => "tool",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "node" => Ok(UnitKind::Node),
            "agent" => Ok(UnitKind::Agent),
            "tool" => Ok(UnitKind::Tool),
            other => Err(SwitchyardError::Config(format!("unknown unit kind '{}'", other))),
        }
    }
}

/// What a unit's `execute` produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOutput {
    /// Structured output fields.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Free-form reply text (agents).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Whether a generative (LLM) call happened while producing this output.
    #[serde(default)]
    pub llm_used: bool,
}

impl UnitOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a structured field.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach reply text.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Mark the output as LLM-produced.
    pub fn generated(mut self) -> Self {
        self.llm_used = true;
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// The JSON view guards and callers see: the data fields, plus `reply`
    /// and `llm_used` unless a data field already uses those names.
    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = self.data.clone();
        if let Some(ref reply) = self.reply {
            obj.entry("reply")
                .or_insert_with(|| serde_json::Value::String(reply.clone()));
        }
        obj.entry("llm_used")
            .or_insert(serde_json::Value::Bool(self.llm_used));
        serde_json::Value::Object(obj)
    }
}

/// One completed request/response exchange within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    pub domain: String,
    pub intent: String,
    pub response: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        query: impl Into<String>,
        domain: impl Into<String>,
        intent: impl Into<String>,
        response: serde_json::Value,
    ) -> Self {
        Self {
            query: query.into(),
            domain: domain.into(),
            intent: intent.into(),
            response,
            timestamp: Utc::now(),
        }
    }

    /// Short text for summaries: the reply if present, else the query.
    pub fn summary_text(&self) -> String {
        self.response
            .get("reply")
            .or_else(|| self.response.get("greeting"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.query.clone())
    }
}

/// Everything the engine keeps for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            transcript: Vec::new(),
            values: BTreeMap::new(),
            created_at: now,
            last_access: now,
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Concatenate the last few turns into a short summary.
    pub fn summary(&self, turns: usize, max_chars: usize) -> String {
        let start = self.transcript.len().saturating_sub(turns);
        let joined = self.transcript[start..]
            .iter()
            .map(|t| t.summary_text())
            .collect::<Vec<_>>()
            .join(" ");
        joined.chars().take(max_chars).collect()
    }
}
