//! Build and run state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a persisted build record
///
/// Stored as the integer codes the build history has always used. Code 3 is
/// treated as terminal and code 4 is never produced; neither has a confirmed
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    /// Build finished successfully
    Success,
    /// Build failed
    Failed,
    /// Build is currently running
    Building,
    /// Terminal code 3
    Terminated,
    /// Code 4 (unused)
    Reserved,
    /// Build is queued and has not started
    Waiting,
}

impl BuildStatus {
    /// Integer code used in storage
    pub fn code(self) -> i64 {
        match self {
            BuildStatus::Success => 0,
            BuildStatus::Failed => 1,
            BuildStatus::Building => 2,
            BuildStatus::Terminated => 3,
            BuildStatus::Reserved => 4,
            BuildStatus::Waiting => 5,
        }
    }

    /// Decode a stored status code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BuildStatus::Success),
            1 => Some(BuildStatus::Failed),
            2 => Some(BuildStatus::Building),
            3 => Some(BuildStatus::Terminated),
            4 => Some(BuildStatus::Reserved),
            5 => Some(BuildStatus::Waiting),
            _ => None,
        }
    }

    /// Whether entering this status stamps the `finished` time
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Terminated
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Building => "building",
            BuildStatus::Terminated => "terminated",
            BuildStatus::Reserved => "reserved",
            BuildStatus::Waiting => "waiting",
        };
        f.write_str(label)
    }
}

/// Lifecycle of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Building,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// A semantic build version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// The version issued after this one; `None` once the patch component is exhausted
    pub fn next_patch(self) -> Option<Self> {
        Some(Self {
            patch: self.patch.checked_add(1)?,
            ..self
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Accepts "M", "M.m" or "M.m.p". Missing components default to 0.0.1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Version::new(0, 0, 1));
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(format!("Invalid version: {}", s));
        }

        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid version component '{}' in {}", part, s))
        };

        let major = parse(parts[0])?;
        let minor = match parts.get(1) {
            Some(p) => parse(p)?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => parse(p)?,
            None => 1,
        };

        Ok(Version::new(major, minor, patch))
    }
}

/// A persisted record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: i64,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub version: Version,
    pub status: BuildStatus,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}
