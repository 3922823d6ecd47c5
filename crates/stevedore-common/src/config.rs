//! Global configuration model for stevedore.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: u32,
    /// Longest single delay.
    pub max_interval: Duration,
    /// Total time budget across all attempts.
    pub ceiling: Duration,
}

impl BackoffPolicy {
    /// Readiness polling defaults.
    #[must_use]
    pub const fn readiness() -> Self {
        Self {
            initial: constants::READINESS_INITIAL_DELAY,
            factor: 2,
            max_interval: constants::READINESS_MAX_INTERVAL,
            ceiling: constants::READINESS_CEILING,
        }
    }

    /// Defaults for retrying an unreachable runtime daemon.
    #[must_use]
    pub const fn daemon_retry() -> Self {
        Self {
            initial: constants::DAEMON_RETRY_INITIAL_DELAY,
            factor: 2,
            max_interval: constants::READINESS_MAX_INTERVAL,
            ceiling: constants::DAEMON_RETRY_CEILING,
        }
    }

    /// Returns a copy with a different total budget.
    #[must_use]
    pub const fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }
}

/// Root configuration for stevedore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StevedoreConfig {
    /// Directory holding persisted project snapshots.
    pub state_dir: PathBuf,
    /// Directory holding per-project advisory locks.
    pub lock_dir: PathBuf,
    /// Container runtime binary.
    pub runtime_binary: String,
    /// Readiness polling schedule used by `start`.
    pub readiness: BackoffPolicy,
    /// Retry schedule for an unreachable runtime daemon.
    pub daemon_retry: BackoffPolicy,
    /// Leave partially started projects up for inspection instead of rolling back.
    pub keep_partial: bool,
    /// Replace locks whose holder process is gone.
    pub reclaim_stale: bool,
    /// Timeout for non-interactive `exec`; `None` waits indefinitely.
    pub exec_timeout: Option<Duration>,
}

impl Default for StevedoreConfig {
    fn default() -> Self {
        Self {
            state_dir: constants::default_state_dir(),
            lock_dir: constants::default_lock_dir(),
            runtime_binary: constants::DEFAULT_RUNTIME_BINARY.to_string(),
            readiness: BackoffPolicy::readiness(),
            daemon_retry: BackoffPolicy::daemon_retry(),
            keep_partial: false,
            reclaim_stale: false,
            exec_timeout: None,
        }
    }
}
