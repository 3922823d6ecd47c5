//! Command dispatch into running containers.

use std::sync::Arc;
use std::time::Duration;

use stevedore_common::error::{DispatchError, Result};
use stevedore_common::types::{ExitOutcome, ServiceStatus};
use stevedore_compose::naming::ContainerNameRegistry;

use crate::backend::{ContainerRuntime, ExecIo, ExecRequest};
use crate::registry::{Amend, ProjectRegistry};

/// Runs commands inside the containers of active projects.
///
/// Dispatch never retries: a command may have side effects, so retrying is
/// left to the caller.
pub struct CommandDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ProjectRegistry>,
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    /// Creates a dispatcher reading project state from `registry`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<ProjectRegistry>) -> Self {
        Self {
            runtime,
            registry,
            default_timeout: None,
        }
    }

    /// Applies `timeout` to non-interactive commands that set none.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Runs `argv` in `service` of `project`, streaming to this process's
    /// stdout and stderr.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::exec_with`].
    pub fn exec(&self, project: &str, service: &str, argv: &[String]) -> Result<ExitOutcome> {
        let request = ExecRequest {
            argv: argv.to_vec(),
            interactive: false,
            timeout: None,
        };
        self.exec_with(project, service, request, ExecIo::inherit())
    }

    /// Runs `request` in `service` of `project`, streaming output to `io`.
    ///
    /// The command's own nonzero exit status is returned in the
    /// [`ExitOutcome`].
    ///
    /// # Errors
    ///
    /// - [`DispatchError::EmptyCommand`] for an empty `argv`
    /// - a project error if `project` is not active
    /// - [`stevedore_common::error::NamingError::UnknownService`] for an
    ///   undeclared service
    /// - [`DispatchError::ContainerNotRunning`] if the service is not
    ///   `Running`; the runtime is not called
    /// - [`DispatchError::LaunchFailed`] or [`DispatchError::TimedOut`]
    ///   from the runtime
    pub fn exec_with(
        &self,
        project: &str,
        service: &str,
        mut request: ExecRequest,
        io: ExecIo,
    ) -> Result<ExitOutcome> {
        if request.argv.is_empty() {
            return Err(DispatchError::EmptyCommand.into());
        }
        let active = self.registry.lookup(project)?;
        let names = ContainerNameRegistry::new(
            project,
            active.services.iter().map(|s| s.logical_name.as_str()),
        )?;
        let container = names.resolve(service)?;
        let status = active
            .service(service)
            .map_or(ServiceStatus::Unknown, |s| s.status);
        if status != ServiceStatus::Running {
            return Err(DispatchError::ContainerNotRunning {
                container: container.to_string(),
                status,
            }
            .into());
        }

        if !request.interactive && request.timeout.is_none() {
            request.timeout = self.default_timeout;
        }
        tracing::info!(
            project,
            service,
            container = %container,
            argv = ?request.argv,
            interactive = request.interactive,
            "dispatching command"
        );
        match self.runtime.exec(&container, &request, io) {
            Ok(outcome) => {
                if outcome.success() {
                    tracing::debug!(container = %container, "command succeeded");
                } else {
                    tracing::info!(container = %container, code = outcome.code, "command exited nonzero");
                }
                Ok(outcome)
            }
            Err(e @ DispatchError::LaunchFailed { .. }) => {
                tracing::warn!(container = %container, error = %e, "command could not be launched");
                let marked = self.registry.amend(project, active.started_at, |p| {
                    p.set_status(service, ServiceStatus::Unknown);
                });
                match marked {
                    Ok(Amend::Applied(_)) => {}
                    Ok(Amend::Busy) => {
                        tracing::info!(project, service, "project busy, service status left as is");
                    }
                    Ok(Amend::Vanished) => {
                        tracing::info!(project, "project stopped during the command");
                    }
                    Err(update) => {
                        tracing::warn!(project, error = %update, "failed to record service status");
                    }
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
