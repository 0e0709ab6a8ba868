//! Workspace - per-run state shared by every stage

use crate::core::{
    error::StageFault,
    state::{BuildRecord, Version},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// A human-readable notice accumulated during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Notice category, e.g. "commit"
    #[serde(rename = "type")]
    pub kind: String,

    pub text: String,
}

/// Mutable memory shared by all stages of one run
///
/// A workspace is created with its pipeline and never reused for a second run.
pub struct Workspace {
    /// Identifier used to correlate log output for this run
    pub run_id: Uuid,

    /// Working directory root; stages resolve relative paths against it
    pub path: PathBuf,

    /// Stage faults in the order they happened
    pub errors: Vec<StageFault>,

    /// Notices for the final report
    pub messages: Vec<Message>,

    /// Version issued by the build store
    pub version: Version,

    /// Build record for this run, once created
    pub build: Option<BuildRecord>,

    /// When the run began
    pub start_time: Option<DateTime<Utc>>,

    /// Request context seeded by the trigger (e.g. a target branch)
    pub vars: Map<String, Value>,

    /// Collaborator state keyed by type (e.g. opened repositories)
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Workspace {
    /// Create a fresh workspace rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            path: path.into(),
            errors: Vec::new(),
            messages: Vec::new(),
            version: Version::default(),
            build: None,
            start_time: None,
            vars: Map::new(),
            extensions: HashMap::new(),
        }
    }

    /// Working directory for this run
    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Resolve a path relative to the working directory
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Shallow-merge trigger context into `vars`
    pub fn merge_vars(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// String value of a seeded variable
    pub fn var_str(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(Value::as_str)
    }

    /// Add a notice for the final report
    pub fn add_message(&mut self, kind: impl Into<String>, text: impl Into<String>) {
        self.messages.push(Message {
            kind: kind.into(),
            text: text.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Attach collaborator state, replacing any previous value of the same type
    pub fn insert_state<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn state_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Mutable collaborator state, created with `Default` on first use
    pub fn state_or_default<T: Any + Send + Sync + Default>(&mut self) -> &mut T {
        let entry = self
            .extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match entry.downcast_mut::<T>() {
            Some(value) => value,
            // Entries are only ever inserted under their own TypeId
            None => unreachable!("workspace state stored under a mismatched type"),
        }
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start_time
            .and_then(|start| Utc::now().signed_duration_since(start).to_std().ok())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("run_id", &self.run_id)
            .field("path", &self.path)
            .field("errors", &self.errors)
            .field("messages", &self.messages)
            .field("version", &self.version)
            .field("build", &self.build)
            .field("start_time", &self.start_time)
            .field("vars", &self.vars)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Render an elapsed time for reports: "850ms", "42s" or "3m 7s"
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }

    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
