//! Persistence layer for build history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteBuildStore;

pub use crate::core::{BuildRecord, BuildStatus, Version};
use crate::core::{secrets::SecretFilter, Stage, StageConfig};
use anyhow::{bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A stage's configuration as recorded for a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Position of the stage in the pipeline
    pub position: usize,

    /// Stage name
    pub name: String,

    /// Configuration with secrets removed
    pub config: StageConfig,
}

impl StageSnapshot {
    /// Snapshot the registry, stripping secret config values
    pub fn capture(stages: &[Stage], secrets: &SecretFilter) -> Vec<StageSnapshot> {
        stages
            .iter()
            .enumerate()
            .map(|(position, stage)| StageSnapshot {
                position,
                name: stage.name.clone(),
                config: secrets.strip(&stage.config),
            })
            .collect()
    }

    /// Whether every `(key, value)` in `properties` equals the recorded config value
    pub fn matches(&self, properties: &StageConfig) -> bool {
        properties
            .iter()
            .all(|(key, value)| self.config.get(key) == Some(value))
    }
}

/// Registration details of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: String,
    pub name: String,

    /// Version the next build will receive
    pub next_version: Version,
}

/// Trait for build history backends
#[async_trait::async_trait]
pub trait BuildStore: Send + Sync {
    /// Register or update a pipeline and the next version it will issue
    async fn register_pipeline(&self, info: &PipelineInfo) -> Result<()>;

    /// Create a build record, issuing the pipeline's next version
    ///
    /// `stages` is recorded as the stage list the build started with.
    async fn create(
        &self,
        pipeline_id: &str,
        status: BuildStatus,
        stages: &[StageSnapshot],
    ) -> Result<BuildRecord>;

    /// Move a build to a new status, stamping start and finish times
    async fn set_status(&self, build_id: i64, status: BuildStatus) -> Result<()>;

    /// Persist the final configuration of every stage of a build
    async fn save_stage_config(&self, build_id: i64, stages: &[StageSnapshot]) -> Result<()>;

    /// Latest successful build's recorded stage whose config matches `properties`
    async fn successful_stage(
        &self,
        pipeline_id: &str,
        stage_name: &str,
        properties: &StageConfig,
    ) -> Result<Option<StageSnapshot>>;

    /// Load a build by ID
    async fn get(&self, build_id: i64) -> Result<Option<BuildRecord>>;

    /// Most recent build of a pipeline
    async fn latest(&self, pipeline_id: &str) -> Result<Option<BuildRecord>>;

    /// Builds of a pipeline, newest first
    async fn list(&self, pipeline_id: &str) -> Result<Vec<BuildRecord>>;

    /// All registered pipelines
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>>;
}

/// Apply a status change to a record, stamping times the way every store does
pub fn apply_status(record: &mut BuildRecord, status: BuildStatus) {
    record.status = status;
    if status == BuildStatus::Building {
        record.started = Some(Utc::now());
    }
    if status.is_terminal() {
        record.finished = Some(Utc::now());
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    pipelines: HashMap<String, PipelineInfo>,
    builds: Vec<BuildRecord>,
    initial_stages: HashMap<i64, Vec<StageSnapshot>>,
    final_stages: HashMap<i64, Vec<StageSnapshot>>,
}

/// In-memory build store (for testing or ephemeral use)
pub struct InMemoryBuildStore {
    state: tokio::sync::RwLock<MemoryState>,
}

impl InMemoryBuildStore {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::RwLock::new(MemoryState::default()),
        }
    }

    /// Stage list recorded when a build was created
    pub async fn initial_stages(&self, build_id: i64) -> Option<Vec<StageSnapshot>> {
        self.state.read().await.initial_stages.get(&build_id).cloned()
    }

    /// Final stage configuration saved for a build
    pub async fn final_stages(&self, build_id: i64) -> Option<Vec<StageSnapshot>> {
        self.state.read().await.final_stages.get(&build_id).cloned()
    }
}

impl Default for InMemoryBuildStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BuildStore for InMemoryBuildStore {
    async fn register_pipeline(&self, info: &PipelineInfo) -> Result<()> {
        let mut state = self.state.write().await;
        state.pipelines.insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn create(
        &self,
        pipeline_id: &str,
        status: BuildStatus,
        stages: &[StageSnapshot],
    ) -> Result<BuildRecord> {
        let mut state = self.state.write().await;

        let pipeline = state
            .pipelines
            .entry(pipeline_id.to_string())
            .or_insert_with(|| PipelineInfo {
                id: pipeline_id.to_string(),
                name: pipeline_id.to_string(),
                next_version: Version::new(0, 0, 1),
            });
        let version = pipeline.next_version;
        let Some(next_version) = version.next_patch() else {
            bail!("Pipeline {} cannot issue a version after {}", pipeline_id, version);
        };
        let pipeline_name = pipeline.name.clone();
        pipeline.next_version = next_version;

        let mut record = BuildRecord {
            id: state.builds.len() as i64 + 1,
            pipeline_id: pipeline_id.to_string(),
            pipeline_name,
            version,
            status: BuildStatus::Waiting,
            started: None,
            finished: None,
        };
        apply_status(&mut record, status);

        state.initial_stages.insert(record.id, stages.to_vec());
        state.builds.push(record.clone());
        Ok(record)
    }

    async fn set_status(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        let mut state = self.state.write().await;
        match state.builds.iter_mut().find(|b| b.id == build_id) {
            Some(record) => {
                apply_status(record, status);
                Ok(())
            }
            None => bail!("Build {} not found", build_id),
        }
    }

    async fn save_stage_config(&self, build_id: i64, stages: &[StageSnapshot]) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.builds.iter().any(|b| b.id == build_id) {
            bail!("Build {} not found", build_id);
        }
        state.final_stages.insert(build_id, stages.to_vec());
        Ok(())
    }

    async fn successful_stage(
        &self,
        pipeline_id: &str,
        stage_name: &str,
        properties: &StageConfig,
    ) -> Result<Option<StageSnapshot>> {
        let state = self.state.read().await;

        let found = state
            .builds
            .iter()
            .rev()
            .filter(|b| b.pipeline_id == pipeline_id && b.status == BuildStatus::Success)
            .filter_map(|b| state.final_stages.get(&b.id))
            .flat_map(|stages| stages.iter())
            .find(|s| s.name == stage_name && s.matches(properties))
            .cloned();

        Ok(found)
    }

    async fn get(&self, build_id: i64) -> Result<Option<BuildRecord>> {
        let state = self.state.read().await;
        Ok(state.builds.iter().find(|b| b.id == build_id).cloned())
    }

    async fn latest(&self, pipeline_id: &str) -> Result<Option<BuildRecord>> {
        let state = self.state.read().await;
        Ok(state
            .builds
            .iter()
            .rev()
            .find(|b| b.pipeline_id == pipeline_id)
            .cloned())
    }

    async fn list(&self, pipeline_id: &str) -> Result<Vec<BuildRecord>> {
        let state = self.state.read().await;
        Ok(state
            .builds
            .iter()
            .rev()
            .filter(|b| b.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>> {
        let state = self.state.read().await;
        let mut pipelines: Vec<PipelineInfo> = state.pipelines.values().cloned().collect();
        pipelines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pipelines)
    }
}

/// Properties to match against when looking up a previous successful stage
pub fn match_properties<I, K>(pairs: I) -> StageConfig
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
