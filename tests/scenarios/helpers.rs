//! Test utility functions for cascade scenarios

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use cascade::core::{stage_fn, FnStage, StageConfig, StageContext};
use cascade::persistence::{
    BuildRecord, BuildStatus, BuildStore, InMemoryBuildStore, PipelineInfo, StageSnapshot,
};
use cascade::{AppContext, Pipeline, PipelineError, PipelineEvents, Settings, Stage, StageAction};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Shared log of what ran, in order
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// An app context on a temp data root, with a store the test can inspect
pub struct TestEnv {
    pub app: Arc<AppContext>,
    pub store: Arc<CountingStore>,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_store(CountingStore::default())
    }

    pub fn with_store(store: CountingStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let app = AppContext::new(Settings::with_data_root(dir.path()), store.clone()).unwrap();
        Self {
            app: Arc::new(app),
            store,
            dir,
        }
    }

    pub fn pipeline(&self, id: &str) -> Pipeline {
        Pipeline::new(self.app.clone(), id)
    }

    pub async fn latest(&self, id: &str) -> BuildRecord {
        self.store.latest(id).await.unwrap().unwrap()
    }
}

/// Stage that appends its name to the log
pub fn tracking_stage(
    log: &RunLog,
) -> FnStage<impl Fn(&mut StageContext<'_>, &mut StageConfig) -> Result<()> + Send + Sync + 'static> {
    let log = log.clone();
    stage_fn(move |ctx, _| {
        log.lock().unwrap().push(ctx.stage.to_string());
        Ok(())
    })
}

/// Stage that logs its name, then fails with `message`
pub fn failing_stage(
    log: &RunLog,
    message: &'static str,
) -> FnStage<impl Fn(&mut StageContext<'_>, &mut StageConfig) -> Result<()> + Send + Sync + 'static> {
    let log = log.clone();
    stage_fn(move |ctx, _| {
        log.lock().unwrap().push(ctx.stage.to_string());
        bail!(message)
    })
}

/// Async stage that sleeps, checking no other stage is in flight meanwhile
pub struct SlowStage {
    pub log: RunLog,
    pub in_flight: Arc<AtomicBool>,
    pub delay: Duration,
    pub fail: bool,
}

#[async_trait]
impl StageAction for SlowStage {
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> Result<()> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            bail!("stage {} overlapped with another stage", ctx.stage);
        }
        tokio::time::sleep(self.delay).await;
        self.in_flight.store(false, Ordering::SeqCst);

        self.log.lock().unwrap().push(ctx.stage.to_string());
        config.insert("slept_ms".into(), (self.delay.as_millis() as u64).into());

        if self.fail {
            bail!("{} timed out", ctx.stage);
        }
        Ok(())
    }
}

/// Event sink recording every hook as a string
#[derive(Default)]
pub struct EventLog {
    pub events: Mutex<Vec<String>>,
    /// Fail the `on_run_stage` hook for this stage
    pub fail_on_stage: Option<String>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl PipelineEvents for EventLog {
    fn on_start(&self, pipeline: &Pipeline) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {}", pipeline.workspace.version));
        Ok(())
    }

    fn on_run_stage(&self, stage: &Stage, index: usize, total: usize, _pipeline: &Pipeline) -> Result<()> {
        if self.fail_on_stage.as_deref() == Some(stage.name.as_str()) {
            bail!("event sink rejected {}", stage.name);
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("stage {} {}/{}", stage.name, index, total));
        Ok(())
    }

    fn on_failed(&self, _pipeline: &Pipeline, error: &PipelineError) -> Result<()> {
        self.events.lock().unwrap().push(format!("failed {}", error));
        Ok(())
    }

    fn on_success(&self, _pipeline: &Pipeline) -> Result<()> {
        self.events.lock().unwrap().push("success".to_string());
        Ok(())
    }
}

/// In-memory store that counts calls and can be told to fail saves or the success status
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryBuildStore,
    pub saves: AtomicUsize,
    pub status_changes: Mutex<Vec<BuildStatus>>,
    pub fail_saves: bool,
    pub fail_success_status: bool,
}

impl CountingStore {
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn failing_success_status() -> Self {
        Self {
            fail_success_status: true,
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn statuses(&self) -> Vec<BuildStatus> {
        self.status_changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildStore for CountingStore {
    async fn register_pipeline(&self, info: &PipelineInfo) -> Result<()> {
        self.inner.register_pipeline(info).await
    }

    async fn create(
        &self,
        pipeline_id: &str,
        status: BuildStatus,
        stages: &[StageSnapshot],
    ) -> Result<BuildRecord> {
        self.inner.create(pipeline_id, status, stages).await
    }

    async fn set_status(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        self.status_changes.lock().unwrap().push(status);
        if self.fail_success_status && status == BuildStatus::Success {
            bail!("db down");
        }
        self.inner.set_status(build_id, status).await
    }

    async fn save_stage_config(&self, build_id: i64, stages: &[StageSnapshot]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            bail!("database is locked");
        }
        self.inner.save_stage_config(build_id, stages).await
    }

    async fn successful_stage(
        &self,
        pipeline_id: &str,
        stage_name: &str,
        properties: &StageConfig,
    ) -> Result<Option<StageSnapshot>> {
        self.inner.successful_stage(pipeline_id, stage_name, properties).await
    }

    async fn get(&self, build_id: i64) -> Result<Option<BuildRecord>> {
        self.inner.get(build_id).await
    }

    async fn latest(&self, pipeline_id: &str) -> Result<Option<BuildRecord>> {
        self.inner.latest(pipeline_id).await
    }

    async fn list(&self, pipeline_id: &str) -> Result<Vec<BuildRecord>> {
        self.inner.list(pipeline_id).await
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>> {
        self.inner.list_pipelines().await
    }
}

/// Hand an event log to `Pipeline::run`
pub fn sink(log: &Arc<EventLog>) -> Option<Arc<dyn PipelineEvents>> {
    let events: Arc<dyn PipelineEvents> = log.clone();
    Some(events)
}
