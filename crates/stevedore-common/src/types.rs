//! Domain primitive types used across the stevedore workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime name of a container, derived from project and logical service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Creates a container name from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selects where package dependencies are bound from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountMode {
    /// Packages come from the vendored path baked into the compose files.
    #[default]
    Standard,
    /// Packages are bound from a host-local development checkout.
    LocalPackages,
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::LocalPackages => write!(f, "local-packages"),
        }
    }
}

/// Lifecycle state of a single service container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// State has not been observed.
    #[default]
    Unknown,
    /// Start was issued, readiness not yet reported.
    Starting,
    /// Container reported ready.
    Running,
    /// Stop was issued.
    Stopping,
    /// Container is not running.
    Stopped,
    /// Container failed to become ready or vanished.
    Degraded,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Aggregate state of an active project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectState {
    /// Services are being brought up.
    Starting,
    /// Every declared service reported ready.
    Running,
    /// Some but not all services reached `Running`.
    Degraded,
    /// Services are being brought down.
    Stopping,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Identity recorded in an advisory lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// PID of the holding process.
    pub pid: u32,
    /// Unique identifier of the holding invocation.
    pub invocation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} (invocation {}) since {}",
            self.pid,
            self.invocation,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Outcome of a command dispatched into a container.
///
/// A nonzero `code` is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    /// Exit code of the invoked process.
    pub code: i32,
}

impl ExitOutcome {
    /// Returns whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}
