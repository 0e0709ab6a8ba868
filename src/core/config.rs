//! Orchestrator settings and per-run overrides

use crate::core::stage::StageConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Orchestrator settings, loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for pipeline directories and the build database
    pub data_root: PathBuf,

    /// SQLite database path (defaults to `<data_root>/builds.db`)
    pub database: Option<PathBuf>,

    /// Extra definition roots, searched before `data_root`
    pub definition_roots: Vec<PathBuf>,

    /// Extra key patterns whose values are stripped before stage config is persisted
    pub secret_keys: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_root: data_dir.join("cascade"),
            database: None,
            definition_roots: Vec::new(),
            secret_keys: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml).context("Invalid settings")?;
        Ok(settings)
    }

    /// Settings rooted at a specific data directory
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Directory holding a pipeline's definition and workspace
    pub fn pipeline_dir(&self, id: &str) -> PathBuf {
        self.data_root.join("pipelines").join(id)
    }

    /// Working directory used by runs of a pipeline
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.pipeline_dir(id).join("workspace")
    }

    /// Definition roots in search order: configured overrides, then the data root
    pub fn definition_search_path(&self) -> Vec<PathBuf> {
        let mut roots = self.definition_roots.clone();
        roots.push(self.data_root.clone());
        roots
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_root.join("builds.db"))
    }
}

/// Per-run overrides supplied by the trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    /// Config patches keyed by stage name
    pub stages: HashMap<String, StageConfig>,

    /// Values merged into the workspace before stages are registered
    pub workspace: Map<String, Value>,
}

impl SettingsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one config field of one stage
    pub fn set_stage_value(&mut self, stage: &str, key: &str, value: Value) -> &mut Self {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    /// Set one workspace value
    pub fn set_workspace_value(&mut self, key: &str, value: Value) -> &mut Self {
        self.workspace.insert(key.to_string(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.workspace.is_empty()
    }
}

/// Interpret a command-line value as JSON when possible, otherwise as a plain string
pub fn parse_override_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
