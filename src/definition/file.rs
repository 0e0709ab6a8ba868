//! YAML pipeline definitions

use crate::app::AppContext;
use crate::core::{Pipeline, PipelineError, SettingsOverride, StageConfig};
use crate::definition::PipelineDefinition;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A pipeline definition file
///
/// ```yaml
/// import: standard
/// stages:
///   - name: build
///     uses: shell
///     config: { command: "make" }
///   - name: lint
///     uses: shell
///     before: build
///     config: { command: "make lint" }
/// remove: [hello-world]
/// settings:
///   stages:
///     notify: { channel: "#deploys" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefinitionFile {
    /// Base template applied first
    pub import: Option<String>,

    /// Stages registered in order
    pub stages: Vec<StageEntry>,

    /// Stages removed after registration
    pub remove: Vec<String>,

    /// Config patches applied last
    pub settings: Option<SettingsOverride>,
}

/// One stage entry of a definition file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageEntry {
    pub name: String,

    /// Catalog entry; defaults to the stage name
    #[serde(default)]
    pub uses: Option<String>,

    #[serde(default)]
    pub config: StageConfig,

    /// Insert directly after this stage
    #[serde(default)]
    pub after: Option<String>,

    /// Insert directly before this stage
    #[serde(default)]
    pub before: Option<String>,

    /// Overwrite in place instead of moving to the end
    #[serde(default)]
    pub replace: bool,
}

impl DefinitionFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: DefinitionFile = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.stages {
            if entry.name.is_empty() {
                bail!("Stage entries need a name");
            }
            let placements = [entry.after.is_some(), entry.before.is_some(), entry.replace]
                .into_iter()
                .filter(|set| *set)
                .count();
            if placements > 1 {
                bail!(
                    "Stage '{}' may use only one of 'after', 'before' and 'replace'",
                    entry.name
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineDefinition for DefinitionFile {
    async fn define(&self, pipeline: &mut Pipeline, _app: &AppContext) -> Result<(), PipelineError> {
        if let Some(base) = &self.import {
            pipeline.import(base, None).await?;
        }

        for entry in &self.stages {
            let source = entry.uses.clone();
            let config = entry.config.clone();

            if let Some(anchor) = &entry.after {
                pipeline.insert_after(anchor, &entry.name, source, config)?;
            } else if let Some(anchor) = &entry.before {
                pipeline.insert_before(anchor, &entry.name, source, config)?;
            } else if entry.replace {
                pipeline.replace(&entry.name, source, config)?;
            } else {
                pipeline.add(&entry.name, source, config)?;
            }
        }

        for name in &self.remove {
            pipeline.remove(name);
        }

        if let Some(settings) = &self.settings {
            pipeline.override_config(settings);
        }

        Ok(())
    }
}
