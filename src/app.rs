//! Application context shared by definitions and stages

use crate::core::{secrets::SecretFilter, Settings};
use crate::definition::{DefinitionLibrary, DefinitionResolver};
use crate::persistence::{BuildStore, InMemoryBuildStore};
use crate::stages::StageCatalog;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Long-lived services handed to every definition and stage
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn BuildStore>,
    pub stages: StageCatalog,
    pub definitions: Arc<dyn DefinitionResolver>,
    pub secrets: SecretFilter,
}

impl AppContext {
    /// Build a context with the built-in stage catalog and the file-backed definition library
    pub fn new(settings: Settings, store: Arc<dyn BuildStore>) -> Result<Self> {
        let secrets =
            SecretFilter::new(&settings.secret_keys).context("Invalid secret key pattern")?;
        let definitions = DefinitionLibrary::with_builtins(settings.definition_search_path());

        Ok(Self {
            settings,
            store,
            stages: StageCatalog::with_builtins(),
            definitions: Arc::new(definitions),
            secrets,
        })
    }

    /// Context backed by an in-memory build store
    pub fn in_memory(settings: Settings) -> Result<Self> {
        Self::new(settings, Arc::new(InMemoryBuildStore::new()))
    }

    /// Context backed by the SQLite database named in the settings
    #[cfg(feature = "sqlite")]
    pub async fn open(settings: Settings) -> Result<Self> {
        let store = crate::persistence::SqliteBuildStore::open(settings.database_path()).await?;
        Self::new(settings, Arc::new(store))
    }

    /// Without SQLite support builds are kept in memory only
    #[cfg(not(feature = "sqlite"))]
    pub async fn open(settings: Settings) -> Result<Self> {
        tracing::warn!("Built without SQLite support; build history is not persisted");
        Self::in_memory(settings)
    }

    /// Swap the definition resolver
    pub fn with_definitions<R: DefinitionResolver + 'static>(mut self, resolver: R) -> Self {
        self.definitions = Arc::new(resolver);
        self
    }

    /// Swap the stage catalog
    pub fn with_stages(mut self, stages: StageCatalog) -> Self {
        self.stages = stages;
        self
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("settings", &self.settings)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
