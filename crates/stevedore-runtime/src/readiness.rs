//! Service readiness probing.
//!
//! A probe answers "is this container ready?" once; [`wait_until_ready`]
//! polls it on a bounded backoff schedule.

use std::time::Instant;

use stevedore_common::config::BackoffPolicy;
use stevedore_common::error::RuntimeError;
use stevedore_common::types::ContainerName;

use crate::backend::{ContainerRuntime, Health};
use crate::backoff::Backoff;
use crate::interrupt::CancelToken;

/// Answer of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The service can accept work.
    Ready,
    /// Not ready yet; keep polling.
    NotYet(String),
    /// Will never become ready; stop polling.
    Failed(String),
}

/// Decides whether a started container is ready.
pub trait ReadinessProbe: Send + Sync {
    /// Checks `container` once.
    fn check(&self, runtime: &dyn ContainerRuntime, container: &ContainerName) -> Readiness;
}

impl<F> ReadinessProbe for F
where
    F: Fn(&dyn ContainerRuntime, &ContainerName) -> Readiness + Send + Sync,
{
    fn check(&self, runtime: &dyn ContainerRuntime, container: &ContainerName) -> Readiness {
        self(runtime, container)
    }
}

/// Default probe: the container runs and its healthcheck, if any, passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStateProbe;

impl ReadinessProbe for RuntimeStateProbe {
    fn check(&self, runtime: &dyn ContainerRuntime, container: &ContainerName) -> Readiness {
        match runtime.inspect(container) {
            Ok(report) if !report.exists => Readiness::NotYet("container does not exist".into()),
            Ok(report) if !report.running => Readiness::NotYet("container is not running".into()),
            Ok(report) => match report.health {
                None | Some(Health::Healthy) => Readiness::Ready,
                Some(Health::Starting) => Readiness::NotYet("healthcheck starting".into()),
                Some(Health::Unhealthy) => Readiness::NotYet("healthcheck failing".into()),
            },
            Err(RuntimeError::DaemonUnavailable { message }) => Readiness::NotYet(message),
            Err(e) => Readiness::Failed(e.to_string()),
        }
    }
}

/// Reason reported when a wait is cut short by `cancel`.
pub const INTERRUPTED: &str = "interrupted";

/// Polls `probe` until it reports ready, fails, `policy.ceiling` elapses or
/// `cancel` is tripped.
///
/// # Errors
///
/// Returns a human-readable reason when the container did not become ready,
/// [`INTERRUPTED`] when cancelled.
pub fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    runtime: &dyn ContainerRuntime,
    container: &ContainerName,
    policy: BackoffPolicy,
    cancel: &CancelToken,
) -> Result<(), String> {
    let deadline = Instant::now() + policy.ceiling;
    let mut schedule = Backoff::new(policy);
    let mut attempts = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return Err(INTERRUPTED.into());
        }
        attempts += 1;
        let last = match probe.check(runtime, container) {
            Readiness::Ready => {
                tracing::debug!(container = %container, attempts, "container ready");
                return Ok(());
            }
            Readiness::Failed(reason) => return Err(reason),
            Readiness::NotYet(reason) => reason,
        };
        let now = Instant::now();
        match schedule.next() {
            Some(delay) if now < deadline => {
                tracing::trace!(container = %container, ?delay, reason = %last, "waiting for readiness");
                if !cancel.sleep(delay.min(deadline - now)) {
                    return Err(INTERRUPTED.into());
                }
            }
            _ => {
                return Err(format!(
                    "did not become ready within {:?} ({last})",
                    policy.ceiling
                ));
            }
        }
    }
}
