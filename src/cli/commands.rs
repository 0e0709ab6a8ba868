//! CLI command definitions

use crate::core::config::parse_override_value;
use crate::core::{SettingsOverride, Version};
use clap::Args;
use serde_json::Value;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline id
    pub id: String,

    /// Stage config override (stage.key=value, value parsed as JSON when possible)
    #[arg(long = "set", value_parser = parse_stage_setting)]
    pub set: Vec<(String, String, Value)>,

    /// Workspace value seeded before the definition runs (key=value)
    #[arg(long = "workspace", value_parser = parse_key_value)]
    pub workspace: Vec<(String, String)>,

    /// Don't save the build to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Collect the override flags
    pub fn overrides(&self) -> SettingsOverride {
        let mut overrides = SettingsOverride::new();
        for (stage, key, value) in &self.set {
            overrides.set_stage_value(stage, key, value.clone());
        }
        for (key, value) in &self.workspace {
            overrides.set_workspace_value(key, parse_override_value(value));
        }
        overrides
    }
}

/// Show the latest build of a pipeline
#[derive(Debug, Args, Clone)]
pub struct InfoCommand {
    /// Pipeline id
    pub id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show build history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline id; all registered pipelines when omitted
    pub id: Option<String>,

    /// Number of recent builds to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Register a pipeline and the version its next build gets
#[derive(Debug, Args, Clone)]
pub struct RegisterCommand {
    /// Pipeline id
    pub id: String,

    /// Display name (defaults to the id)
    #[arg(long)]
    pub name: Option<String>,

    /// Next version, as M, M.m or M.m.p
    #[arg(long, default_value = "0.0.1")]
    pub version: Version,
}

/// List the stages a pipeline's definition registers
#[derive(Debug, Args, Clone)]
pub struct StagesCommand {
    /// Pipeline id
    pub id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Parse stage.key=value settings
pub fn parse_stage_setting(s: &str) -> Result<(String, String, Value), String> {
    let (path, value) = parse_key_value(s)?;
    match path.split_once('.') {
        Some((stage, key)) if !stage.is_empty() && !key.is_empty() => {
            Ok((stage.to_string(), key.to_string(), parse_override_value(&value)))
        }
        _ => Err(format!("Expected stage.key=value, got: {}", s)),
    }
}
