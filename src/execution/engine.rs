//! Execution engine - runs a pipeline's stages with error recovery

use crate::app::AppContext;
use crate::core::{
    BuildStatus, Pipeline, PipelineError, RunState, SettingsOverride, StageContext, StageFault,
};
use crate::execution::events::PipelineEvents;
use crate::persistence::{apply_status, StageSnapshot};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one run of a pipeline
///
/// Stages run strictly one after another. When a stage fails, every later
/// stage flagged `run_on_error` still runs, then the run is rejected with
/// the original fault.
#[derive(Clone, Default)]
pub struct ExecutionEngine {
    events: Option<Arc<dyn PipelineEvents>>,
}

impl ExecutionEngine {
    pub fn new(events: Option<Arc<dyn PipelineEvents>>) -> Self {
        Self { events }
    }

    /// Engine reporting to an event sink
    pub fn with_events<E: PipelineEvents + 'static>(events: E) -> Self {
        Self::new(Some(Arc::new(events)))
    }

    fn emit<F>(&self, fire: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&dyn PipelineEvents) -> anyhow::Result<()>,
    {
        match &self.events {
            Some(events) => fire(events.as_ref()).map_err(PipelineError::Event),
            None => Ok(()),
        }
    }

    /// Run every stage of `pipeline`
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        overrides: &SettingsOverride,
    ) -> Result<(), PipelineError> {
        if pipeline.state() != RunState::NotStarted {
            return Err(PipelineError::AlreadyRun(pipeline.id.clone()));
        }
        pipeline.set_state(RunState::Building);

        let app = Arc::clone(pipeline.app());
        pipeline.workspace.start_time = Some(Utc::now());
        let created = tokio::fs::create_dir_all(pipeline.workspace.dir()).await;
        if let Err(e) = created {
            pipeline.set_state(RunState::Failed);
            return Err(e.into());
        }

        let initial = StageSnapshot::capture(pipeline.stages(), &app.secrets);
        let build = match app.store.create(&pipeline.id, BuildStatus::Building, &initial).await {
            Ok(build) => build,
            Err(e) => {
                pipeline.set_state(RunState::Failed);
                return Err(PipelineError::Store(e));
            }
        };

        pipeline.override_config(overrides);
        pipeline.workspace.version = build.version;
        pipeline.workspace.build = Some(build.clone());

        info!(
            "Starting pipeline {} version {} (build {}, run {})",
            pipeline.id, build.version, build.id, pipeline.workspace.run_id
        );

        let result = match self.emit(|e| e.on_start(pipeline)) {
            Ok(()) => self.run_stages(pipeline, &app, build.id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.finish_success(pipeline, &app, build.id).await,
            Err(e @ PipelineError::Stage(_)) => self.finish_failure(pipeline, &app, build.id, e).await,
            Err(e) => {
                // Event and store faults skip the failure report
                pipeline.set_state(RunState::Failed);
                self.mark_failed(pipeline, &app, build.id).await;
                Err(e)
            }
        }
    }

    async fn finish_success(
        &self,
        pipeline: &mut Pipeline,
        app: &AppContext,
        build_id: i64,
    ) -> Result<(), PipelineError> {
        if let Err(e) = app.store.set_status(build_id, BuildStatus::Success).await {
            pipeline.set_state(RunState::Failed);
            self.mark_failed(pipeline, app, build_id).await;
            return Err(PipelineError::Store(e));
        }
        if let Some(build) = pipeline.workspace.build.as_mut() {
            apply_status(build, BuildStatus::Success);
        }
        pipeline.set_state(RunState::Succeeded);

        info!(
            "Pipeline {} version {} succeeded",
            pipeline.id, pipeline.workspace.version
        );
        self.emit(|e| e.on_success(pipeline))?;

        let snapshot = StageSnapshot::capture(pipeline.stages(), &app.secrets);
        app.store
            .save_stage_config(build_id, &snapshot)
            .await
            .map_err(PipelineError::Store)
    }

    async fn finish_failure(
        &self,
        pipeline: &mut Pipeline,
        app: &AppContext,
        build_id: i64,
        fault: PipelineError,
    ) -> Result<(), PipelineError> {
        pipeline.set_state(RunState::Failed);
        error!("Pipeline {} failed: {}", pipeline.id, fault);
        self.emit(|e| e.on_failed(pipeline, &fault))?;

        let snapshot = StageSnapshot::capture(pipeline.stages(), &app.secrets);
        if let Err(e) = app.store.save_stage_config(build_id, &snapshot).await {
            error!("Failed to save stage config for build {}: {:#}", build_id, e);
        }

        Err(fault)
    }

    async fn mark_failed(&self, pipeline: &mut Pipeline, app: &AppContext, build_id: i64) {
        if let Err(e) = app.store.set_status(build_id, BuildStatus::Failed).await {
            error!("Failed to mark build {} as failed: {:#}", build_id, e);
        }
        if let Some(build) = pipeline.workspace.build.as_mut() {
            apply_status(build, BuildStatus::Failed);
        }
    }

    /// Sequential runner; on a fault runs the recovery pass and marks the build failed
    async fn run_stages(
        &self,
        pipeline: &mut Pipeline,
        app: &AppContext,
        build_id: i64,
    ) -> Result<(), PipelineError> {
        let total = pipeline.stage_count();

        for index in 0..total {
            let Err(fault) = self.run_stage(pipeline, app, index, total).await? else {
                continue;
            };

            warn!("{}", fault);
            pipeline.workspace.errors.push(fault.clone());

            let recovery: Vec<usize> = (index + 1..total)
                .filter(|&i| pipeline.stages()[i].run_on_error)
                .collect();
            if !recovery.is_empty() {
                info!(
                    "Running {} recovery stage(s) for pipeline {}",
                    recovery.len(),
                    pipeline.id
                );
                self.run_recovery(pipeline, app, &recovery, total).await?;
            }

            self.mark_failed(pipeline, app, build_id).await;
            return Err(fault.into());
        }

        Ok(())
    }

    /// Runs every selected stage in order; faults are recorded and the pass continues
    async fn run_recovery(
        &self,
        pipeline: &mut Pipeline,
        app: &AppContext,
        indices: &[usize],
        total: usize,
    ) -> Result<(), PipelineError> {
        for &index in indices {
            if let Err(fault) = self.run_stage(pipeline, app, index, total).await? {
                warn!("Recovery {}", fault);
                pipeline.workspace.errors.push(fault);
            }
        }
        Ok(())
    }

    /// Invoke one stage. The outer error is an event handler failure, the inner one a stage fault.
    async fn run_stage(
        &self,
        pipeline: &mut Pipeline,
        app: &AppContext,
        index: usize,
        total: usize,
    ) -> Result<Result<(), StageFault>, PipelineError> {
        let stage = &pipeline.stages()[index];
        self.emit(|e| e.on_run_stage(stage, index, total, pipeline))?;

        if stage.is_forced_to_fail() {
            return Ok(Err(StageFault::forced(&stage.name)));
        }

        let action = stage.action();
        let name = stage.name.clone();
        let pipeline_id = pipeline.id.clone();
        debug!("Running stage {} ({}/{}) of {}", name, index + 1, total, pipeline_id);

        // `index` was bounds-checked by the lookup above
        let (stage, workspace) = pipeline.stage_and_workspace(index);
        let mut ctx = StageContext {
            pipeline_id: &pipeline_id,
            stage: &name,
            index,
            total,
            app,
            workspace,
        };

        Ok(action
            .run(&mut ctx, &mut stage.config)
            .await
            .map_err(|e| StageFault::from_error(&name, &e)))
    }
}

impl Pipeline {
    /// Run this pipeline once
    ///
    /// Creates the build record, applies `overrides`, runs every stage and
    /// persists the final stage configuration. Returns the original stage
    /// fault when a stage fails.
    pub async fn run(
        &mut self,
        overrides: &SettingsOverride,
        events: Option<Arc<dyn PipelineEvents>>,
    ) -> Result<(), PipelineError> {
        ExecutionEngine::new(events).execute(self, overrides).await
    }
}
