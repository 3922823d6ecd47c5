//! Container runtime abstraction.
//!
//! The launcher, dispatcher and readiness probes only talk to the runtime
//! through [`ContainerRuntime`], so tests can substitute a scripted
//! implementation for the Docker CLI.

pub mod docker;

use std::io::Write;
use std::time::Duration;

use stevedore_common::error::{DispatchError, RuntimeError, StevedoreError};
use stevedore_common::types::{ContainerName, ExitOutcome};
use stevedore_compose::plan::ComposePlan;

use crate::ports::PortMap;

/// Health reported by a container healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Healthcheck has not passed yet.
    Starting,
    /// Healthcheck passes.
    Healthy,
    /// Healthcheck fails.
    Unhealthy,
}

/// Observed state of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerStatusReport {
    /// The runtime knows the container.
    pub exists: bool,
    /// The container's main process is running.
    pub running: bool,
    /// Healthcheck result, if the image declares one.
    pub health: Option<Health>,
}

impl ContainerStatusReport {
    /// Report for a container the runtime does not know.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            exists: false,
            running: false,
            health: None,
        }
    }

    /// Report for a running container without a healthcheck.
    #[must_use]
    pub const fn running() -> Self {
        Self {
            exists: true,
            running: true,
            health: None,
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The container was running and has been stopped.
    Stopped,
    /// The container was already stopped or absent.
    AlreadyStopped,
}

/// A command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments.
    pub argv: Vec<String>,
    /// Attach the caller's terminal.
    pub interactive: bool,
    /// Kill the command after this long.
    pub timeout: Option<Duration>,
}

/// Output sinks for a dispatched command.
pub struct ExecIo {
    /// Receives the command's standard output.
    pub stdout: Box<dyn Write + Send>,
    /// Receives the command's standard error.
    pub stderr: Box<dyn Write + Send>,
}

impl ExecIo {
    /// Streams to the orchestrator's own stdout and stderr.
    #[must_use]
    pub fn inherit() -> Self {
        Self {
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        }
    }

    /// Discards all output.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
        }
    }
}

impl std::fmt::Debug for ExecIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecIo").finish_non_exhaustive()
    }
}

/// Container runtime operations used by the orchestrator.
///
/// Implementations must be safe to call from several threads at once:
/// services within a start level are launched concurrently and independent
/// `exec` calls may overlap.
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DaemonUnavailable`] if it is not.
    fn ping(&self) -> Result<(), RuntimeError>;

    /// Materializes whatever the runtime needs before services start,
    /// such as the merged compose file.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be rendered or written.
    fn prepare(&self, _plan: &ComposePlan) -> Result<(), StevedoreError> {
        Ok(())
    }

    /// Creates and starts one service of `plan` without its dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the service.
    fn start_service(&self, plan: &ComposePlan, service: &str) -> Result<(), RuntimeError>;

    /// Reports the observed state of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn inspect(&self, container: &ContainerName) -> Result<ContainerStatusReport, RuntimeError>;

    /// Stops a container. Stopping an absent or stopped container succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails to stop it.
    fn stop(&self, container: &ContainerName) -> Result<StopOutcome, RuntimeError>;

    /// Runs a command inside a running container, streaming its output.
    ///
    /// A nonzero exit status is returned as an [`ExitOutcome`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::LaunchFailed`] if the command could not be
    /// started and [`DispatchError::TimedOut`] if it exceeded its timeout.
    fn exec(
        &self,
        container: &ContainerName,
        request: &ExecRequest,
        io: ExecIo,
    ) -> Result<ExitOutcome, DispatchError>;

    /// Reports the host ports published by a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn port_mappings(&self, container: &ContainerName) -> Result<PortMap, RuntimeError>;
}
