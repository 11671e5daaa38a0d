use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchyardError};

/// Top-level Switchyard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one `<domain>.toml` per domain.
    #[serde(default = "default_domains_dir")]
    pub domains_dir: String,
    #[serde(default = "default_domain")]
    pub default_domain: String,
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    /// Route unknown domains to `default_domain` instead of failing.
    #[serde(default)]
    pub fallback_to_default_domain: bool,
    /// Ask the LLM to pick an intent when no rule matches.
    #[serde(default)]
    pub use_llm_classifier: bool,
}

fn default_domains_dir() -> String {
    "domains".to_string()
}
fn default_domain() -> String {
    "hello".to_string()
}
fn default_unit_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domains_dir: default_domains_dir(),
            default_domain: default_domain(),
            unit_timeout_secs: default_unit_timeout_secs(),
            fallback_to_default_domain: false,
            use_llm_classifier: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// SQLite database path (supports `~/`).
    #[serde(default = "default_state_path")]
    pub path: String,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Turns returned by `history` when the caller gives no limit.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_state_path() -> String {
    "~/.switchyard/state.db".to_string()
}
fn default_idle_ttl_secs() -> u64 {
    86_400
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_history_limit() -> usize {
    10
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::default(),
            path: default_state_path(),
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            history_limit: default_history_limit(),
        }
    }
}

/// Describes the external LLM provider. The engine itself only sees an `LlmClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SwitchyardError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| SwitchyardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.default_domain.trim().is_empty() {
            return Err(SwitchyardError::Config(
                "engine.default_domain must not be empty".into(),
            ));
        }
        if self.engine.unit_timeout_secs == 0 {
            return Err(SwitchyardError::Config(
                "engine.unit_timeout_secs must be at least 1".into(),
            ));
        }
        if self.state.sweep_interval_secs == 0 {
            return Err(SwitchyardError::Config(
                "state.sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the domains directory. Relative paths are taken relative to `base`.
    pub fn domains_dir(&self, base: &Path) -> PathBuf {
        let dir = expand_home(&self.engine.domains_dir);
        if dir.is_absolute() {
            dir
        } else {
            base.join(dir)
        }
    }

    /// Resolve the SQLite state path (expand ~).
    pub fn state_path(&self) -> PathBuf {
        expand_home(&self.state.path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay as written.
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
