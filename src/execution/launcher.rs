//! Trigger-facing entry points: run a pipeline by id

use crate::app::AppContext;
use crate::core::{BuildRecord, Pipeline, PipelineError, SettingsOverride};
use crate::definition::pipeline_path;
use crate::execution::events::PipelineEvents;
use std::sync::Arc;
use tracing::debug;

/// Instantiate a pipeline and run its definition, without running it
///
/// Workspace overrides are merged before the definition registers stages.
pub async fn prepare(
    app: Arc<AppContext>,
    id: &str,
    overrides: &SettingsOverride,
) -> Result<Pipeline, PipelineError> {
    let mut pipeline = Pipeline::new(Arc::clone(&app), id);
    pipeline.workspace.merge_vars(&overrides.workspace);

    let definition = app
        .definitions
        .resolve(&pipeline_path(id))
        .await
        .map_err(PipelineError::Definition)?
        .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string()))?;

    debug!("Defining pipeline {}", id);
    definition.define(&mut pipeline, &app).await?;
    Ok(pipeline)
}

/// Resolve, define and run a pipeline; returns it for inspection
pub async fn launch(
    app: Arc<AppContext>,
    id: &str,
    overrides: &SettingsOverride,
    events: Option<Arc<dyn PipelineEvents>>,
) -> (Option<Pipeline>, Result<(), PipelineError>) {
    let mut pipeline = match prepare(app, id, overrides).await {
        Ok(pipeline) => pipeline,
        Err(e) => return (None, Err(e)),
    };
    let result = pipeline.run(overrides, events).await;
    (Some(pipeline), result)
}

/// Resolve, define and run a pipeline
pub async fn run(
    app: Arc<AppContext>,
    id: &str,
    overrides: &SettingsOverride,
    events: Option<Arc<dyn PipelineEvents>>,
) -> Result<(), PipelineError> {
    launch(app, id, overrides, events).await.1
}

/// Most recent build of a pipeline
pub async fn get_info(app: &AppContext, id: &str) -> Result<Option<BuildRecord>, PipelineError> {
    app.store.latest(id).await.map_err(PipelineError::Store)
}
