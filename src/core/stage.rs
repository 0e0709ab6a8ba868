//! Stage domain model

use crate::app::AppContext;
use crate::core::workspace::Workspace;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Open key/value configuration of a stage
pub type StageConfig = Map<String, Value>;

/// Config key that makes a stage fail before its implementation is invoked
pub const FORCE_FAILURE_KEY: &str = "forceFailure";

/// Everything a stage implementation can see while it runs
pub struct StageContext<'a> {
    /// Pipeline being run
    pub pipeline_id: &'a str,

    /// Name of the running stage
    pub stage: &'a str,

    /// Position of the stage in the registry
    pub index: usize,

    /// Number of stages in the registry
    pub total: usize,

    /// Shared services (build store, settings, catalog)
    pub app: &'a AppContext,

    /// Per-run shared memory, including the working directory
    pub workspace: &'a mut Workspace,
}

/// Executable implementation bound to a stage
#[async_trait]
pub trait StageAction: Send + Sync {
    /// Run the stage. An `Err` is a stage fault.
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> anyhow::Result<()>;

    /// Whether this stage still runs after an earlier stage failed
    fn run_on_error(&self) -> bool {
        false
    }
}

/// A stage implemented by a synchronous closure
pub struct FnStage<F> {
    f: F,
    run_on_error: bool,
}

impl<F> FnStage<F> {
    /// Mark this stage as part of the recovery cascade
    pub fn on_error(mut self) -> Self {
        self.run_on_error = true;
        self
    }
}

#[async_trait]
impl<F> StageAction for FnStage<F>
where
    F: Fn(&mut StageContext<'_>, &mut StageConfig) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> anyhow::Result<()> {
        (self.f)(ctx, config)
    }

    fn run_on_error(&self) -> bool {
        self.run_on_error
    }
}

/// Wrap a closure as a stage implementation
pub fn stage_fn<F>(f: F) -> FnStage<F>
where
    F: Fn(&mut StageContext<'_>, &mut StageConfig) -> anyhow::Result<()> + Send + Sync + 'static,
{
    FnStage {
        f,
        run_on_error: false,
    }
}

/// Where a stage's implementation comes from
#[derive(Clone, Default)]
pub enum StageSource {
    /// Look up a catalog entry with the same name as the stage
    #[default]
    SameAsName,

    /// Look up a catalog entry by logical name
    Named(String),

    /// Use the given implementation directly
    Inline(Arc<dyn StageAction>),
}

impl StageSource {
    pub fn inline<A: StageAction + 'static>(action: A) -> Self {
        StageSource::Inline(Arc::new(action))
    }
}

impl From<&str> for StageSource {
    fn from(name: &str) -> Self {
        StageSource::Named(name.to_string())
    }
}

impl From<String> for StageSource {
    fn from(name: String) -> Self {
        StageSource::Named(name)
    }
}

impl From<Option<String>> for StageSource {
    fn from(name: Option<String>) -> Self {
        name.map(StageSource::Named).unwrap_or_default()
    }
}

impl From<Arc<dyn StageAction>> for StageSource {
    fn from(action: Arc<dyn StageAction>) -> Self {
        StageSource::Inline(action)
    }
}

impl<F> From<FnStage<F>> for StageSource
where
    F: Fn(&mut StageContext<'_>, &mut StageConfig) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn from(stage: FnStage<F>) -> Self {
        StageSource::inline(stage)
    }
}

impl fmt::Debug for StageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSource::SameAsName => f.write_str("SameAsName"),
            StageSource::Named(name) => f.debug_tuple("Named").field(name).finish(),
            StageSource::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

/// A named, configured unit of work in a pipeline
#[derive(Clone)]
pub struct Stage {
    /// Unique name within the pipeline
    pub name: String,

    /// Catalog entry the implementation came from, or "inline"
    pub uses: String,

    /// Live configuration; stages may write results back into it
    pub config: StageConfig,

    /// Runs during the recovery cascade after an earlier failure
    pub run_on_error: bool,

    action: Arc<dyn StageAction>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        uses: impl Into<String>,
        action: Arc<dyn StageAction>,
        config: StageConfig,
    ) -> Self {
        Self {
            name: name.into(),
            uses: uses.into(),
            config,
            run_on_error: action.run_on_error(),
            action,
        }
    }

    /// Shared handle to the implementation
    pub fn action(&self) -> Arc<dyn StageAction> {
        Arc::clone(&self.action)
    }

    /// Whether `forceFailure` is set to a truthy value
    pub fn is_forced_to_fail(&self) -> bool {
        self.config.get(FORCE_FAILURE_KEY).is_some_and(is_truthy)
    }

    /// Shallow-merge a patch into the config
    pub fn merge_config(&mut self, patch: &StageConfig) {
        for (key, value) in patch {
            self.config.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("uses", &self.uses)
            .field("config", &self.config)
            .field("run_on_error", &self.run_on_error)
            .finish_non_exhaustive()
    }
}

/// Build a stage config from a JSON value; anything but an object yields an empty config
pub fn stage_config(value: Value) -> StageConfig {
    match value {
        Value::Object(map) => map,
        _ => StageConfig::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
