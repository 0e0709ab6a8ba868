//! Run lifecycle events

use crate::core::{Pipeline, PipelineError, Stage, Version};
use anyhow::Result;

/// Observer of a pipeline run
///
/// Handlers are observational. An `Err` from a handler is not caught: it
/// aborts the run as [`PipelineError::Event`].
pub trait PipelineEvents: Send + Sync {
    fn on_start(&self, _pipeline: &Pipeline) -> Result<()> {
        Ok(())
    }

    /// Fired before each stage invocation, recovery stages included
    fn on_run_stage(
        &self,
        _stage: &Stage,
        _index: usize,
        _total: usize,
        _pipeline: &Pipeline,
    ) -> Result<()> {
        Ok(())
    }

    fn on_failed(&self, _pipeline: &Pipeline, _error: &PipelineError) -> Result<()> {
        Ok(())
    }

    fn on_success(&self, _pipeline: &Pipeline) -> Result<()> {
        Ok(())
    }
}

/// Owned snapshot of a lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        pipeline_id: String,
        version: Version,
    },
    StageStarted {
        stage: String,
        index: usize,
        total: usize,
        progress: f64,
    },
    Failed {
        pipeline_id: String,
        error: String,
    },
    Succeeded {
        pipeline_id: String,
        version: Version,
    },
}

/// Adapts a closure over [`PipelineEvent`] into an event sink
pub struct FnEvents<F> {
    handler: F,
}

impl<F> FnEvents<F>
where
    F: Fn(PipelineEvent) -> Result<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> PipelineEvents for FnEvents<F>
where
    F: Fn(PipelineEvent) -> Result<()> + Send + Sync,
{
    fn on_start(&self, pipeline: &Pipeline) -> Result<()> {
        (self.handler)(PipelineEvent::Started {
            pipeline_id: pipeline.id.clone(),
            version: pipeline.workspace.version,
        })
    }

    fn on_run_stage(&self, stage: &Stage, index: usize, total: usize, pipeline: &Pipeline) -> Result<()> {
        (self.handler)(PipelineEvent::StageStarted {
            stage: stage.name.clone(),
            index,
            total,
            progress: pipeline.stage_progress(stage),
        })
    }

    fn on_failed(&self, pipeline: &Pipeline, error: &PipelineError) -> Result<()> {
        (self.handler)(PipelineEvent::Failed {
            pipeline_id: pipeline.id.clone(),
            error: error.to_string(),
        })
    }

    fn on_success(&self, pipeline: &Pipeline) -> Result<()> {
        (self.handler)(PipelineEvent::Succeeded {
            pipeline_id: pipeline.id.clone(),
            version: pipeline.workspace.version,
        })
    }
}
