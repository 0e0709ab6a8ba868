//! Stage catalog - maps logical stage names to implementations

pub mod builtin;

use crate::core::StageAction;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Two-layer lookup of stage implementations
///
/// Registered stages shadow built-in ones with the same name.
#[derive(Clone, Default)]
pub struct StageCatalog {
    overrides: HashMap<String, Arc<dyn StageAction>>,
    builtins: HashMap<String, Arc<dyn StageAction>>,
}

impl StageCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the built-in stage kinds
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        builtin::register_all(&mut catalog);
        catalog
    }

    /// Add a stage to the built-in layer
    pub fn register_builtin<A: StageAction + 'static>(&mut self, name: &str, action: A) {
        self.builtins.insert(name.to_string(), Arc::new(action));
    }

    /// Add (or replace) a stage in the override layer
    pub fn register<A: StageAction + 'static>(&mut self, name: &str, action: A) {
        debug!("Registering stage kind {}", name);
        self.overrides.insert(name.to_string(), Arc::new(action));
    }

    /// Remove a stage from the override layer, uncovering any built-in of the same name
    pub fn unregister(&mut self, name: &str) -> bool {
        self.overrides.remove(name).is_some()
    }

    /// Resolve a logical name, override layer first
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn StageAction>> {
        self.overrides
            .get(name)
            .or_else(|| self.builtins.get(name))
            .cloned()
    }

    /// All resolvable names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .overrides
            .keys()
            .chain(self.builtins.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for StageCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCatalog")
            .field("names", &self.names())
            .finish()
    }
}
