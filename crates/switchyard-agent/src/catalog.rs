//! Domain catalog: every domain file under `engine.domains_dir`, parsed,
//! validated and compiled once at startup.
//!
//! A domain that fails to load aborts the whole load, so a broken domain is
//! never routable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::registry::UnitRegistry;

use crate::graph::{compile, CompiledGraph, DomainFile};

/// One routable intent.
#[derive(Debug, Clone)]
pub struct IntentEntry {
    pub name: String,
    pub description: String,
    /// Lowercased keywords, matched as substrings.
    pub keywords: Vec<String>,
    /// Case-insensitive patterns.
    pub patterns: Vec<Regex>,
    pub graph: Arc<CompiledGraph>,
}

/// A loaded domain with its intents in declaration order.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub name: String,
    pub default_intent: Option<String>,
    pub intents: Vec<IntentEntry>,
}

impl DomainEntry {
    pub fn intent(&self, name: &str) -> Option<&IntentEntry> {
        self.intents.iter().find(|i| i.name == name)
    }

    pub fn intent_names(&self) -> Vec<&str> {
        self.intents.iter().map(|i| i.name.as_str()).collect()
    }
}

/// All loaded domains, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DomainCatalog {
    domains: BTreeMap<String, DomainEntry>,
}

impl DomainCatalog {
    /// Load every `*.toml` file in `dir`, in file name order.
    pub fn load_dir(dir: &Path, registry: &UnitRegistry) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SwitchyardError::Config(format!(
                "cannot read domains directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file = DomainFile::from_toml(&content).map_err(|e| {
                SwitchyardError::Config(format!("{}: {}", path.display(), e))
            })?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if file.domain != stem {
                return Err(SwitchyardError::Config(format!(
                    "{}: declares domain '{}' but the file must be named {}.toml",
                    path.display(),
                    file.domain,
                    file.domain
                )));
            }
            debug!(path = %path.display(), domain = %file.domain, "Domain file parsed");
            files.push(file);
        }

        if files.is_empty() {
            return Err(SwitchyardError::Config(format!(
                "no domain files found in {}",
                dir.display()
            )));
        }
        Self::from_files(files, registry)
    }

    /// Build a catalog from already parsed domain files.
    pub fn from_files(files: Vec<DomainFile>, registry: &UnitRegistry) -> Result<Self> {
        let mut domains = BTreeMap::new();
        for file in files {
            let entry = load_domain(file, registry)?;
            if domains.contains_key(&entry.name) {
                return Err(SwitchyardError::Config(format!(
                    "domain '{}' is defined twice",
                    entry.name
                )));
            }
            info!(
                domain = %entry.name,
                intents = entry.intents.len(),
                default_intent = entry.default_intent.as_deref().unwrap_or("-"),
                "Domain loaded"
            );
            domains.insert(entry.name.clone(), entry);
        }
        Ok(Self { domains })
    }

    pub fn domain(&self, name: &str) -> Option<&DomainEntry> {
        self.domains.get(name)
    }

    /// Domain names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.domains.keys().map(String::as_str).collect()
    }

    pub fn domains(&self) -> impl Iterator<Item = &DomainEntry> {
        self.domains.values()
    }

    pub fn graph(&self, domain: &str, intent: &str) -> Option<&Arc<CompiledGraph>> {
        self.domain(domain)?.intent(intent).map(|i| &i.graph)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn load_domain(file: DomainFile, registry: &UnitRegistry) -> Result<DomainEntry> {
    let domain = file.domain.clone();
    let config_err = |msg: String| SwitchyardError::Config(format!("domain '{}': {}", domain, msg));

    if domain.trim().is_empty() {
        return Err(SwitchyardError::Config("domain name is empty".into()));
    }
    if file.intents.is_empty() {
        return Err(config_err("no intents declared".into()));
    }

    let mut names = HashSet::new();
    for intent in &file.intents {
        if !names.insert(intent.name.as_str()) {
            return Err(config_err(format!("intent '{}' is declared twice", intent.name)));
        }
    }
    if let Some(ref default) = file.default_intent {
        if !names.contains(default.as_str()) {
            return Err(config_err(format!("default_intent '{}' is not declared", default)));
        }
    }

    let mut workflow_names = HashSet::new();
    for workflow in &file.workflows {
        if !workflow_names.insert(workflow.name.as_str()) {
            return Err(config_err(format!("workflow '{}' is declared twice", workflow.name)));
        }
    }

    // Every workflow is compiled, referenced or not. A graph shared by
    // several intents carries the first intent's name.
    let mut compiled: HashMap<&str, Arc<CompiledGraph>> = HashMap::new();
    for definition in &file.workflows {
        let label = match file.intents.iter().find(|i| i.workflow_name() == definition.name) {
            Some(intent) => intent.name.as_str(),
            None => {
                debug!(domain = %domain, workflow = %definition.name, "Workflow not referenced by any intent");
                definition.name.as_str()
            }
        };
        let graph = compile(&domain, label, definition, registry)?;
        compiled.insert(definition.name.as_str(), Arc::new(graph));
    }

    let mut intents = Vec::with_capacity(file.intents.len());
    for intent in &file.intents {
        let workflow_name = intent.workflow_name();
        let graph = compiled.get(workflow_name).cloned().ok_or_else(|| {
            config_err(format!(
                "intent '{}' uses undefined workflow '{}'",
                intent.name, workflow_name
            ))
        })?;

        let mut patterns = Vec::with_capacity(intent.patterns.len());
        for pattern in &intent.patterns {
            let regex = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
                config_err(format!(
                    "intent '{}' has invalid pattern '{}': {}",
                    intent.name, pattern, e
                ))
            })?;
            patterns.push(regex);
        }

        intents.push(IntentEntry {
            name: intent.name.clone(),
            description: intent.description.clone(),
            keywords: intent.keywords.iter().map(|k| k.to_lowercase()).collect(),
            patterns,
            graph,
        });
    }

    Ok(DomainEntry {
        name: domain,
        default_intent: file.default_intent,
        intents,
    })
}
