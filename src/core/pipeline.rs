//! Pipeline domain model - the ordered stage registry and its workspace

use crate::app::AppContext;
use crate::core::{
    config::SettingsOverride,
    error::PipelineError,
    stage::{Stage, StageConfig, StageSource},
    state::RunState,
    workspace::Workspace,
};
use crate::definition::template_path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pipeline instance: stage registry plus the workspace for one run
///
/// Insertion order is execution order and names are unique. An instance can
/// be run once; a new run needs a new instance.
pub struct Pipeline {
    /// External identifier
    pub id: String,

    /// Data directory of this pipeline
    pub path: PathBuf,

    /// Shared memory for the run
    pub workspace: Workspace,

    stages: Vec<Stage>,
    state: RunState,
    app: Arc<AppContext>,
    imports: Vec<String>,
}

impl Pipeline {
    /// Create an empty pipeline with a fresh workspace
    pub fn new(app: Arc<AppContext>, id: impl Into<String>) -> Self {
        let id = id.into();
        let path = app.settings.pipeline_dir(&id);
        let workspace = Workspace::new(app.settings.workspace_dir(&id));

        Pipeline {
            id,
            path,
            workspace,
            stages: Vec::new(),
            state: RunState::NotStarted,
            app,
            imports: Vec::new(),
        }
    }

    /// Shared services this pipeline was created with
    pub fn app(&self) -> &Arc<AppContext> {
        &self.app
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Mutable access to a stage and the workspace at the same time
    ///
    /// Panics if `index` is out of range.
    pub(crate) fn stage_and_workspace(&mut self, index: usize) -> (&mut Stage, &mut Workspace) {
        (&mut self.stages[index], &mut self.workspace)
    }

    /// Build a stage without registering it
    pub fn create_stage(
        &self,
        name: &str,
        source: impl Into<StageSource>,
        config: StageConfig,
    ) -> Result<Stage, PipelineError> {
        let (uses, action) = match source.into() {
            StageSource::Inline(action) => ("inline".to_string(), action),
            StageSource::SameAsName => (name.to_string(), self.resolve_action(name, name)?),
            StageSource::Named(kind) => {
                let action = self.resolve_action(name, &kind)?;
                (kind, action)
            }
        };

        Ok(Stage::new(name, uses, action, config))
    }

    fn resolve_action(
        &self,
        stage: &str,
        kind: &str,
    ) -> Result<Arc<dyn crate::core::stage::StageAction>, PipelineError> {
        self.app
            .stages
            .resolve(kind)
            .ok_or_else(|| PipelineError::UnknownStage {
                stage: stage.to_string(),
                kind: kind.to_string(),
            })
    }

    /// Append a stage, removing any existing stage with the same name first
    pub fn add(
        &mut self,
        name: &str,
        source: impl Into<StageSource>,
        config: StageConfig,
    ) -> Result<&mut Stage, PipelineError> {
        let stage = self.create_stage(name, source, config)?;
        self.remove(name);
        self.stages.push(stage);

        debug!("Added stage {} to pipeline {}", name, self.id);
        let index = self.stages.len() - 1;
        Ok(&mut self.stages[index])
    }

    /// Remove the named stage. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.index_of(name) {
            Some(index) => {
                self.stages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Overwrite the named stage in place, or append it if absent
    pub fn replace(
        &mut self,
        name: &str,
        source: impl Into<StageSource>,
        config: StageConfig,
    ) -> Result<&mut Stage, PipelineError> {
        let stage = self.create_stage(name, source, config)?;

        let index = match self.index_of(name) {
            Some(index) => {
                self.stages[index] = stage;
                index
            }
            None => {
                self.stages.push(stage);
                self.stages.len() - 1
            }
        };

        Ok(&mut self.stages[index])
    }

    /// Insert a stage directly after `anchor`
    ///
    /// An existing stage called `name` is removed first. If `anchor` is not
    /// registered the stage goes to the start of the pipeline.
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: &str,
        source: impl Into<StageSource>,
        config: StageConfig,
    ) -> Result<&mut Stage, PipelineError> {
        let stage = self.create_stage(name, source, config)?;
        self.remove(name);

        let index = match self.index_of(anchor) {
            Some(index) => index + 1,
            None => {
                if !anchor.is_empty() {
                    warn!(
                        "Pipeline stage '{}' doesn't exist; inserting '{}' at the start of pipeline {}",
                        anchor, name, self.id
                    );
                }
                0
            }
        };

        self.stages.insert(index, stage);
        Ok(&mut self.stages[index])
    }

    /// Insert a stage directly before `anchor`
    ///
    /// An existing stage called `name` is removed first. If `anchor` is not
    /// registered the stage goes to the end of the pipeline.
    pub fn insert_before(
        &mut self,
        anchor: &str,
        name: &str,
        source: impl Into<StageSource>,
        config: StageConfig,
    ) -> Result<&mut Stage, PipelineError> {
        let stage = self.create_stage(name, source, config)?;
        self.remove(name);

        let index = match self.index_of(anchor) {
            Some(index) => index,
            None => {
                if !anchor.is_empty() {
                    warn!(
                        "Pipeline stage '{}' doesn't exist; inserting '{}' at the end of pipeline {}",
                        anchor, name, self.id
                    );
                }
                self.stages.len()
            }
        };

        self.stages.insert(index, stage);
        Ok(&mut self.stages[index])
    }

    /// Get a stage and its index by name
    pub fn get_stage(&self, name: &str) -> Option<(usize, &Stage)> {
        self.stages.iter().enumerate().find(|(_, s)| s.name == name)
    }

    /// Get a mutable stage and its index by name
    pub fn get_stage_mut(&mut self, name: &str) -> Option<(usize, &mut Stage)> {
        self.stages.iter_mut().enumerate().find(|(_, s)| s.name == name)
    }

    /// Index of the named stage
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Index of a stage in this registry, matched by name
    pub fn stage_index(&self, stage: &Stage) -> Option<usize> {
        self.index_of(&stage.name)
    }

    /// Index-based progress of a stage: `index / count`, always below 1
    pub fn stage_progress(&self, stage: &Stage) -> f64 {
        match self.stage_index(stage) {
            Some(index) => index as f64 / self.stages.len() as f64,
            None => 0.0,
        }
    }

    /// Shallow-merge per-stage config patches; unknown stage names are ignored
    pub fn override_config(&mut self, overrides: &SettingsOverride) {
        for (name, patch) in &overrides.stages {
            if let Some((_, stage)) = self.get_stage_mut(name) {
                stage.merge_config(patch);
            }
        }
    }

    /// Run a shared base definition against this pipeline, then apply `overrides`
    pub async fn import(
        &mut self,
        base: &str,
        overrides: Option<&SettingsOverride>,
    ) -> Result<(), PipelineError> {
        if self.imports.iter().any(|b| b == base) {
            let mut chain = self.imports.clone();
            chain.push(base.to_string());
            return Err(PipelineError::ImportCycle(chain.join(" -> ")));
        }

        let app = Arc::clone(&self.app);
        let definition = app
            .definitions
            .resolve(&template_path(base))
            .await
            .map_err(PipelineError::Definition)?
            .ok_or_else(|| PipelineError::UnknownImport(base.to_string()))?;

        debug!("Importing {} into pipeline {}", base, self.id);
        self.imports.push(base.to_string());
        let result = definition.define(self, &app).await;
        self.imports.pop();
        result?;

        if let Some(overrides) = overrides {
            self.override_config(overrides);
        }

        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("stages", &self.stages)
            .field("state", &self.state)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}
