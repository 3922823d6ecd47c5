//! Bringing projects up and down.
//!
//! [`ComposeLauncher`] starts a project's services level by level in
//! dependency order, waits for each level to become ready before moving
//! on, and rolls back what it started when a level fails or the start is
//! interrupted.

use std::collections::HashMap;
use std::sync::Arc;

use stevedore_common::config::{BackoffPolicy, StevedoreConfig};
use stevedore_common::error::{NamingError, ProjectError, Result, RuntimeError, StevedoreError};
use stevedore_common::types::{ProjectState, ServiceStatus};
use stevedore_compose::plan::ComposePlan;
use stevedore_compose::project::ProjectConfig;

use crate::backend::{ContainerRuntime, Health, StopOutcome};
use crate::backoff::retry_transient;
use crate::interrupt::{CancelToken, InterruptForwarder};
use crate::ports::PortMap;
use crate::readiness::{INTERRUPTED, ReadinessProbe, RuntimeStateProbe, wait_until_ready};
use crate::registry::{ActiveProject, Amend, ProjectRegistry, ServiceContainer};

/// Tunables for [`ComposeLauncher`].
#[derive(Debug, Clone, Copy)]
pub struct LaunchOptions {
    /// Readiness polling schedule; its ceiling bounds each level's wait.
    pub readiness: BackoffPolicy,
    /// Retry schedule while the runtime daemon is unreachable.
    pub daemon_retry: BackoffPolicy,
    /// Leave a failed start's containers running for inspection.
    pub keep_partial: bool,
}

impl LaunchOptions {
    /// Options taken from the global configuration.
    #[must_use]
    pub const fn from_config(config: &StevedoreConfig) -> Self {
        Self {
            readiness: config.readiness,
            daemon_retry: config.daemon_retry,
            keep_partial: config.keep_partial,
        }
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_config(&StevedoreConfig::default())
    }
}

/// Summary of a `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Containers that were running and were stopped, in stop order.
    pub stopped: Vec<String>,
    /// Containers that were already stopped or absent.
    pub already_stopped: Vec<String>,
}

#[derive(Debug)]
struct ServiceResult {
    service: String,
    issued: bool,
    outcome: std::result::Result<(), String>,
}

/// Starts and stops projects against a [`ContainerRuntime`].
pub struct ComposeLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ProjectRegistry>,
    options: LaunchOptions,
    default_probe: Arc<dyn ReadinessProbe>,
    probes: HashMap<String, Arc<dyn ReadinessProbe>>,
    cancel: CancelToken,
}

impl std::fmt::Debug for ComposeLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeLauncher")
            .field("options", &self.options)
            .field("probes", &self.probes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ComposeLauncher {
    /// Creates a launcher using the default readiness probe for every service.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ProjectRegistry>,
        options: LaunchOptions,
    ) -> Self {
        Self {
            runtime,
            registry,
            options,
            default_probe: Arc::new(RuntimeStateProbe),
            probes: HashMap::new(),
            cancel: InterruptForwarder::global().cancel_token(),
        }
    }

    /// Gives up on starts when `cancel` is tripped instead of on the
    /// process-wide interrupt.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Uses `probe` to decide when `service` is ready.
    #[must_use]
    pub fn with_probe(mut self, service: impl Into<String>, probe: Arc<dyn ReadinessProbe>) -> Self {
        let _ = self.probes.insert(service.into(), probe);
        self
    }

    /// The registry this launcher records projects in.
    #[must_use]
    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    /// Builds the launch plan for `config` without touching the runtime.
    ///
    /// # Errors
    ///
    /// Returns configuration and naming errors from layer merging and
    /// dependency resolution.
    pub fn plan(&self, config: &ProjectConfig) -> Result<ComposePlan> {
        ComposePlan::build(config)
    }

    /// Brings `config`'s project up.
    ///
    /// Starting a project that already runs in the same mount mode returns
    /// the existing entry without touching any container.
    ///
    /// # Errors
    ///
    /// - configuration and naming errors before any runtime call
    /// - [`RuntimeError::ModeMismatch`] if the project runs in another mode
    /// - [`RuntimeError::Degraded`] if an earlier start left it partially up
    /// - [`RuntimeError::StartFailed`] if a service did not become ready
    /// - [`RuntimeError::Interrupted`] if the start was cancelled
    /// - lock errors if another invocation owns the project
    pub fn start(&self, config: &ProjectConfig) -> Result<ActiveProject> {
        let plan = self.plan(config)?;
        let name = config.project_name.as_str();

        if let Some(existing) = self.registry.claim(name)? {
            if existing.config.mount_mode != config.mount_mode {
                return Err(RuntimeError::ModeMismatch {
                    project: name.to_string(),
                    running: existing.config.mount_mode,
                    requested: config.mount_mode,
                }
                .into());
            }
            if existing.state == ProjectState::Running {
                tracing::info!(project = name, "project already running");
                return Ok(existing);
            }
            return Err(RuntimeError::Degraded {
                project: name.to_string(),
                state: existing.state,
            }
            .into());
        }

        retry_transient(self.options.daemon_retry, "ping", || self.runtime.ping())?;
        self.runtime.prepare(&plan)?;
        let _ = self.registry.register(ActiveProject::new(&plan))?;
        tracing::info!(project = name, mode = %config.mount_mode, levels = plan.levels.len(), "starting project");

        let mut started: Vec<String> = Vec::new();
        let interrupted = || RuntimeError::Interrupted {
            project: name.to_string(),
        };
        for (depth, level) in plan.levels.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(self.abort(name, &plan, &started, &[], interrupted()));
            }
            tracing::debug!(project = name, depth, services = ?level, "starting level");
            let results = self.start_level(&plan, level);
            started.extend(results.iter().filter(|r| r.issued).map(|r| r.service.clone()));

            if self.cancel.is_cancelled() {
                tracing::warn!(project = name, depth, "start interrupted");
                return Err(self.abort(name, &plan, &started, &results, interrupted()));
            }
            let failure = results
                .iter()
                .find_map(|r| r.outcome.as_ref().err().map(|reason| (r.service.clone(), reason.clone())));
            let Some((service, reason)) = failure else {
                continue;
            };
            tracing::error!(project = name, service = %service, %reason, "service failed to start");
            let err = RuntimeError::StartFailed {
                project: name.to_string(),
                service,
                reason,
            };
            return Err(self.abort(name, &plan, &started, &results, err));
        }

        let active = self.registry.update(name, |p| p.state = ProjectState::Running)?;
        tracing::info!(project = name, services = active.services.len(), "project running");
        Ok(active)
    }

    /// Starts every service of one level concurrently and waits for each to
    /// become ready. Results keep the level's order.
    fn start_level(&self, plan: &ComposePlan, level: &[String]) -> Vec<ServiceResult> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = level
                .iter()
                .map(|service| (service, scope.spawn(move || self.start_service(plan, service))))
                .collect();
            handles
                .into_iter()
                .map(|(service, handle)| {
                    handle.join().unwrap_or_else(|_| ServiceResult {
                        service: service.clone(),
                        issued: true,
                        outcome: Err("start thread panicked".into()),
                    })
                })
                .collect()
        })
    }

    fn start_service(&self, plan: &ComposePlan, service: &str) -> ServiceResult {
        let project = plan.config.project_name.as_str();
        let result = |issued, outcome| ServiceResult {
            service: service.to_string(),
            issued,
            outcome,
        };
        if self.cancel.is_cancelled() {
            return result(false, Err(INTERRUPTED.into()));
        }
        let container = match plan.names.resolve(service) {
            Ok(container) => container,
            Err(e) => return result(false, Err(e.to_string())),
        };

        self.record_status(project, service, ServiceStatus::Starting);
        if let Err(e) = retry_transient(self.options.daemon_retry, "start", || {
            self.runtime.start_service(plan, service)
        }) {
            self.record_status(project, service, ServiceStatus::Unknown);
            return result(false, Err(format!("could not be started: {e}")));
        }
        tracing::info!(project, service, container = %container, "service started");

        let probe = self.probes.get(service).unwrap_or(&self.default_probe);
        let ready = wait_until_ready(
            probe.as_ref(),
            self.runtime.as_ref(),
            &container,
            self.options.readiness,
            &self.cancel,
        );
        match ready {
            Ok(()) => {
                self.record_status(project, service, ServiceStatus::Running);
                result(true, Ok(()))
            }
            Err(reason) => result(true, Err(reason)),
        }
    }

    fn record_status(&self, project: &str, service: &str, status: ServiceStatus) {
        if let Err(e) = self.registry.update(project, |p| p.set_status(service, status)) {
            tracing::warn!(project, service, error = %e, "failed to record service status");
        }
    }

    /// Records a failed start as degraded, then rolls it back unless partial
    /// state is kept. Returns `err` for the caller to propagate.
    fn abort(
        &self,
        project: &str,
        plan: &ComposePlan,
        started: &[String],
        results: &[ServiceResult],
        err: RuntimeError,
    ) -> StevedoreError {
        let marked = self.registry.update(project, |p| {
            p.state = ProjectState::Degraded;
            for r in results.iter().filter(|r| r.outcome.is_err()) {
                p.set_status(&r.service, ServiceStatus::Degraded);
            }
        });
        if let Err(e) = marked {
            tracing::error!(project, error = %e, "failed to record degraded state");
        }
        if self.options.keep_partial {
            tracing::warn!(project, "leaving partially started project for inspection");
        } else {
            self.roll_back(project, plan, started);
        }
        err.into()
    }

    /// Stops `started` in reverse start order and unregisters the project.
    fn roll_back(&self, project: &str, plan: &ComposePlan, started: &[String]) {
        for service in started.iter().rev() {
            let Ok(container) = plan.names.resolve(service) else {
                continue;
            };
            tracing::warn!(project, service = %service, container = %container, "rolling back service");
            let stopped = retry_transient(self.options.daemon_retry, "stop", || {
                self.runtime.stop(&container)
            });
            if let Err(e) = stopped {
                tracing::error!(project, container = %container, error = %e, "rollback could not stop container");
            }
        }
        if let Err(e) = self.registry.unregister(project) {
            tracing::warn!(project, error = %e, "failed to unregister after rollback");
        }
    }

    /// Brings `project` down in reverse dependency order.
    ///
    /// Already stopped containers are tolerated. The project is unregistered
    /// even if some containers fail to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotActive`] for an unknown project, a lock
    /// error if another invocation owns it, and
    /// [`RuntimeError::StopFailed`] listing containers that did not stop.
    pub fn stop(&self, project: &str) -> Result<StopReport> {
        let Some(active) = self.registry.claim(project)? else {
            return Err(ProjectError::NotActive {
                project: project.to_string(),
            }
            .into());
        };
        let _ = self.registry.update(project, |p| {
            p.state = ProjectState::Stopping;
            for s in &mut p.services {
                s.status = ServiceStatus::Stopping;
            }
        })?;
        tracing::info!(project, services = active.services.len(), "stopping project");

        let mut report = StopReport::default();
        let mut failed = Vec::new();
        for service in active.services.iter().rev() {
            let container = &service.container_name;
            match retry_transient(self.options.daemon_retry, "stop", || self.runtime.stop(container)) {
                Ok(StopOutcome::Stopped) => {
                    tracing::info!(project, container = %container, "container stopped");
                    report.stopped.push(container.to_string());
                }
                Ok(StopOutcome::AlreadyStopped) => {
                    tracing::debug!(project, container = %container, "container already stopped");
                    report.already_stopped.push(container.to_string());
                }
                Err(e) => {
                    tracing::error!(project, container = %container, error = %e, "failed to stop container");
                    failed.push(container.to_string());
                }
            }
        }

        let _ = self.registry.unregister(project)?;
        if failed.is_empty() {
            Ok(report)
        } else {
            Err(RuntimeError::StopFailed {
                project: project.to_string(),
                containers: failed,
            }
            .into())
        }
    }

    /// Re-queries the runtime for every container of `project` and records
    /// what it reports. While another invocation holds the project the
    /// observed statuses are returned but not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotActive`] for an unknown project and
    /// runtime errors if the runtime cannot be queried.
    pub fn refresh(&self, project: &str) -> Result<ActiveProject> {
        let active = self.registry.lookup(project)?;
        let mut observed = Vec::with_capacity(active.services.len());
        for service in &active.services {
            let report = retry_transient(self.options.daemon_retry, "inspect", || {
                self.runtime.inspect(&service.container_name)
            })?;
            let status = match (report.running, report.health) {
                (false, _) => ServiceStatus::Stopped,
                (true, Some(Health::Starting)) => ServiceStatus::Starting,
                (true, Some(Health::Unhealthy)) => ServiceStatus::Degraded,
                (true, None | Some(Health::Healthy)) => ServiceStatus::Running,
            };
            observed.push((service.logical_name.clone(), status));
        }
        let record = |p: &mut ActiveProject| {
            for (service, status) in &observed {
                p.set_status(service, *status);
            }
            if matches!(p.state, ProjectState::Running | ProjectState::Degraded) {
                p.state = if p.all_running() {
                    ProjectState::Running
                } else {
                    ProjectState::Degraded
                };
            }
        };
        match self.registry.amend(project, active.started_at, &record)? {
            Amend::Applied(updated) => Ok(updated),
            Amend::Busy => {
                tracing::debug!(project, "project busy, reporting without recording");
                let mut view = active;
                record(&mut view);
                Ok(view)
            }
            Amend::Vanished => Err(ProjectError::NotActive {
                project: project.to_string(),
            }
            .into()),
        }
    }

    /// Host ports published by `service` of `project`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotActive`] for an unknown project,
    /// [`NamingError::UnknownService`] for an unknown service and runtime
    /// errors if the runtime cannot be queried.
    pub fn ports(&self, project: &str, service: &str) -> Result<PortMap> {
        let active = self.registry.lookup(project)?;
        let ServiceContainer { container_name, .. } =
            active
                .service(service)
                .ok_or_else(|| NamingError::UnknownService {
                    project: project.to_string(),
                    service: service.to_string(),
                })?;
        Ok(retry_transient(self.options.daemon_retry, "ports", || {
            self.runtime.port_mappings(container_name)
        })?)
    }
}
