//! Pipeline definitions and their resolution
//!
//! A definition registers stages on a fresh [`Pipeline`]. Definitions are
//! looked up by logical path (`pipelines/<id>/pipeline`,
//! `templates/pipelines/<name>`) across an ordered list of roots, falling
//! back to definitions registered in code.

pub mod file;

pub use file::{DefinitionFile, StageEntry};

use crate::app::AppContext;
use crate::core::{Pipeline, PipelineError, StageConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registers stages on a pipeline
#[async_trait]
pub trait PipelineDefinition: Send + Sync {
    async fn define(&self, pipeline: &mut Pipeline, app: &AppContext) -> Result<(), PipelineError>;
}

/// Maps a logical path to a definition
#[async_trait]
pub trait DefinitionResolver: Send + Sync {
    /// Resolve a logical path; `Ok(None)` when nothing is defined there
    async fn resolve(&self, path: &str) -> Result<Option<Arc<dyn PipelineDefinition>>>;

    /// Drop any cached resolution of `path`
    async fn invalidate(&self, path: &str);
}

/// Logical path of a shared base definition
pub fn template_path(name: &str) -> String {
    format!("templates/pipelines/{}", name)
}

/// Logical path of a pipeline's own definition
pub fn pipeline_path(id: &str) -> String {
    format!("pipelines/{}/pipeline", id)
}

/// A definition implemented by a synchronous closure
pub struct FnDefinition<F> {
    f: F,
}

/// Wrap a closure as a pipeline definition
pub fn define_fn<F>(f: F) -> FnDefinition<F>
where
    F: Fn(&mut Pipeline, &AppContext) -> Result<(), PipelineError> + Send + Sync + 'static,
{
    FnDefinition { f }
}

#[async_trait]
impl<F> PipelineDefinition for FnDefinition<F>
where
    F: Fn(&mut Pipeline, &AppContext) -> Result<(), PipelineError> + Send + Sync,
{
    async fn define(&self, pipeline: &mut Pipeline, app: &AppContext) -> Result<(), PipelineError> {
        (self.f)(pipeline, app)
    }
}

struct CachedDefinition {
    modified: Option<SystemTime>,
    definition: Arc<dyn PipelineDefinition>,
}

/// File-backed definition resolver with in-code fallbacks
///
/// Roots are searched in order for `<root>/<path>.yaml`. Parsed files are
/// cached and re-read when their modification time changes.
pub struct DefinitionLibrary {
    roots: Vec<PathBuf>,
    builtins: HashMap<String, Arc<dyn PipelineDefinition>>,
    cache: RwLock<HashMap<PathBuf, CachedDefinition>>,
}

impl DefinitionLibrary {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            builtins: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Library with the stock templates registered
    pub fn with_builtins(roots: Vec<PathBuf>) -> Self {
        let mut library = Self::new(roots);
        library.register(
            &template_path("hello-world"),
            define_fn(|pipeline, _| {
                pipeline.add("hello-world", "hello-world", StageConfig::new())?;
                Ok(())
            }),
        );
        library.register(
            &template_path("notify"),
            define_fn(|pipeline, _| {
                pipeline.add("notify", "notify", StageConfig::new())?;
                Ok(())
            }),
        );
        library
    }

    /// Register an in-code definition, used when no file exists for `path`
    pub fn register<D: PipelineDefinition + 'static>(&mut self, path: &str, definition: D) {
        self.builtins.insert(path.to_string(), Arc::new(definition));
    }

    fn candidates(&self, path: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let relative = format!("{}.yaml", path);
        self.roots.iter().map(move |root| root.join(&relative))
    }

    async fn load(&self, file: &Path) -> Result<Arc<dyn PipelineDefinition>> {
        let modified = tokio::fs::metadata(file)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok());

        if let Some(cached) = self.cache.read().await.get(file) {
            if modified.is_some() && cached.modified == modified {
                return Ok(Arc::clone(&cached.definition));
            }
        }

        let content = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let parsed = DefinitionFile::from_yaml(&content)
            .with_context(|| format!("Invalid definition {}", file.display()))?;
        info!("Loaded pipeline definition {}", file.display());

        let definition: Arc<dyn PipelineDefinition> = Arc::new(parsed);
        self.cache.write().await.insert(
            file.to_path_buf(),
            CachedDefinition {
                modified,
                definition: Arc::clone(&definition),
            },
        );
        Ok(definition)
    }
}

#[async_trait]
impl DefinitionResolver for DefinitionLibrary {
    async fn resolve(&self, path: &str) -> Result<Option<Arc<dyn PipelineDefinition>>> {
        for file in self.candidates(path) {
            if tokio::fs::try_exists(&file).await.unwrap_or(false) {
                debug!("Resolved {} to {}", path, file.display());
                return self.load(&file).await.map(Some);
            }
        }

        Ok(self.builtins.get(path).cloned())
    }

    async fn invalidate(&self, path: &str) {
        let files: Vec<PathBuf> = self.candidates(path).collect();
        let mut cache = self.cache.write().await;
        for file in files {
            if cache.remove(&file).is_some() {
                debug!("Invalidated cached definition {}", file.display());
            }
        }
    }
}
