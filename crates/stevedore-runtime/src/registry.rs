//! Table of active projects.
//!
//! Every entry is keyed by project name and backed by a persisted snapshot
//! (see [`crate::state`]), so that the project an earlier invocation
//! started can be found again. Mutating a project requires its advisory
//! lock, which the registry acquires on [`ProjectRegistry::claim`] or
//! [`ProjectRegistry::register`] and holds until the registry is dropped or
//! the project is unregistered. A registry that does not hold the lock
//! re-reads the snapshot on every lookup and writes only through
//! [`ProjectRegistry::amend`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stevedore_common::error::{LockError, ProjectError, StevedoreError};
use stevedore_common::types::{ContainerName, LockHolder, ProjectState, ServiceStatus};
use stevedore_compose::plan::ComposePlan;
use stevedore_compose::project::ProjectConfig;

use crate::lock::ProjectLock;
use crate::state::StateStore;

/// One logical service of an active project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContainer {
    /// Logical service name, e.g. `web`.
    pub logical_name: String,
    /// Derived runtime container name.
    pub container_name: ContainerName,
    /// Last known status.
    pub status: ServiceStatus,
}

/// A project with live (or partially live) containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProject {
    /// Configuration the project was started with.
    pub config: ProjectConfig,
    /// Services in start order.
    pub services: Vec<ServiceContainer>,
    /// When the start began.
    pub started_at: DateTime<Utc>,
    /// Aggregate state.
    pub state: ProjectState,
    /// Lock holder of the invocation that registered the project.
    pub lock_holder: Option<LockHolder>,
}

impl ActiveProject {
    /// A freshly registered project for `plan`, every service `Unknown`.
    #[must_use]
    pub fn new(plan: &ComposePlan) -> Self {
        let services = plan
            .start_order()
            .filter_map(|service| {
                plan.names.resolve(service).ok().map(|container_name| ServiceContainer {
                    logical_name: service.to_string(),
                    container_name,
                    status: ServiceStatus::Unknown,
                })
            })
            .collect();
        Self {
            config: plan.config.clone(),
            services,
            started_at: Utc::now(),
            state: ProjectState::Starting,
            lock_holder: None,
        }
    }

    /// Project name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.project_name
    }

    /// Looks up a service by logical name.
    #[must_use]
    pub fn service(&self, logical: &str) -> Option<&ServiceContainer> {
        self.services.iter().find(|s| s.logical_name == logical)
    }

    /// Sets the status of `logical`, if it belongs to the project.
    pub fn set_status(&mut self, logical: &str, status: ServiceStatus) {
        if let Some(service) = self.services.iter_mut().find(|s| s.logical_name == logical) {
            service.status = status;
        }
    }

    /// Returns `true` when every service is `Running`.
    #[must_use]
    pub fn all_running(&self) -> bool {
        self.services.iter().all(|s| s.status == ServiceStatus::Running)
    }
}

/// Result of [`ProjectRegistry::amend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amend {
    /// The change was written; the new snapshot.
    Applied(ActiveProject),
    /// Another invocation holds the lock; nothing was written.
    Busy,
    /// The project was stopped or restarted since it was read.
    Vanished,
}

#[derive(Debug, Default)]
struct Entry {
    project: Option<ActiveProject>,
    lock: Option<ProjectLock>,
}

/// Process-wide table of active projects.
#[derive(Debug)]
pub struct ProjectRegistry {
    store: StateStore,
    lock_dir: PathBuf,
    reclaim_stale: bool,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ProjectRegistry {
    /// Creates a registry persisting to `state_dir` and locking in `lock_dir`.
    #[must_use]
    pub fn new(state_dir: &Path, lock_dir: &Path) -> Self {
        Self {
            store: StateStore::new(state_dir),
            lock_dir: lock_dir.to_path_buf(),
            reclaim_stale: false,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces stale locks instead of failing with [`LockError::Stale`].
    #[must_use]
    pub const fn reclaim_stale(mut self, reclaim: bool) -> Self {
        self.reclaim_stale = reclaim;
        self
    }

    /// Directory holding the advisory locks.
    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Acquires `project`'s lock and returns its snapshot, if any.
    ///
    /// Repeated claims from the same registry reuse the held lock.
    ///
    /// # Errors
    ///
    /// Returns a [`LockError`] if the lock cannot be acquired and a
    /// [`ProjectError`] if the snapshot cannot be read.
    pub fn claim(&self, project: &str) -> Result<Option<ActiveProject>, StevedoreError> {
        let mut entries = self.entries();
        self.ensure_lock(&mut entries, project)?;
        let loaded = match entries.get(project).and_then(|e| e.project.clone()) {
            Some(active) => Some(active),
            None => self.store.load(project)?,
        };
        if let Some(entry) = entries.get_mut(project) {
            entry.project.clone_from(&loaded);
        }
        Ok(loaded)
    }

    /// Registers `project`, acquiring its lock if this registry does not
    /// hold it yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::AlreadyActive`] if the project is already
    /// registered and [`LockError::HeldByOther`] if another process holds
    /// the lock.
    pub fn register(&self, mut project: ActiveProject) -> Result<ActiveProject, StevedoreError> {
        let name = project.name().to_string();
        let mut entries = self.entries();
        let known = entries.get(&name).is_some_and(|e| e.project.is_some());
        if known || self.store.load(&name)?.is_some() {
            return Err(ProjectError::AlreadyActive { project: name }.into());
        }
        self.ensure_lock(&mut entries, &name)?;
        let entry = entries
            .get_mut(&name)
            .ok_or_else(|| ProjectError::NotActive {
                project: name.clone(),
            })?;
        project.lock_holder = entry.lock.as_ref().map(|l| l.holder().clone());
        self.store.save(&project)?;
        entry.project = Some(project.clone());
        tracing::info!(project = %name, services = project.services.len(), "project registered");
        Ok(project)
    }

    /// Returns the entry for `project`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotActive`] if the project is not registered.
    pub fn lookup(&self, project: &str) -> Result<ActiveProject, ProjectError> {
        let mut entries = self.entries();
        self.cached(&mut entries, project).cloned()
    }

    /// Applies `change` to the entry for `project` and persists the result,
    /// acquiring the project's lock if this registry does not hold it yet.
    ///
    /// # Errors
    ///
    /// Returns a [`LockError`] if another invocation owns the project,
    /// [`ProjectError::NotActive`] if the project is not registered and
    /// [`ProjectError::Io`] if the snapshot cannot be written.
    pub fn update(
        &self,
        project: &str,
        change: impl FnOnce(&mut ActiveProject),
    ) -> Result<ActiveProject, StevedoreError> {
        let mut entries = self.entries();
        let held = owns(&entries, project);
        self.ensure_lock(&mut entries, project)?;
        let active = match self.cached(&mut entries, project) {
            Ok(active) => active,
            Err(e) => {
                if !held {
                    drop(entries.remove(project));
                }
                return Err(e.into());
            }
        };
        change(&mut *active);
        self.store.save(active)?;
        Ok(active.clone())
    }

    /// Applies `change` to `project` only if the snapshot is still the one
    /// started at `started_at`.
    ///
    /// Unlike [`ProjectRegistry::update`] this never waits for or fails on
    /// the project's lock: if another invocation holds it, nothing is
    /// written and [`Amend::Busy`] is returned. A snapshot that was removed
    /// or replaced by a newer start in the meantime is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the snapshot cannot be read or
    /// written.
    pub fn amend(
        &self,
        project: &str,
        started_at: DateTime<Utc>,
        change: impl FnOnce(&mut ActiveProject),
    ) -> Result<Amend, ProjectError> {
        let mut entries = self.entries();
        if owns(&entries, project) {
            return match self.cached(&mut entries, project) {
                Ok(active) if active.started_at == started_at => {
                    change(&mut *active);
                    self.store.save(active)?;
                    Ok(Amend::Applied(active.clone()))
                }
                Ok(_) | Err(ProjectError::NotActive { .. }) => Ok(Amend::Vanished),
                Err(e) => Err(e),
            };
        }

        let _lock = match ProjectLock::acquire(&self.lock_dir, project, false) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::debug!(project, reason = %e, "project busy, not recording");
                return Ok(Amend::Busy);
            }
        };
        let current = self.store.load(project)?;
        let Some(mut active) = current.filter(|p| p.started_at == started_at) else {
            if let Some(entry) = entries.get_mut(project) {
                entry.project = None;
            }
            return Ok(Amend::Vanished);
        };
        change(&mut active);
        self.store.save(&active)?;
        entries.entry(project.to_string()).or_default().project = Some(active.clone());
        Ok(Amend::Applied(active))
    }

    /// Removes `project` and releases its lock.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotActive`] if the project is not registered.
    pub fn unregister(&self, project: &str) -> Result<ActiveProject, ProjectError> {
        let mut entries = self.entries();
        let removed = self.cached(&mut entries, project)?.clone();
        self.store.remove(project)?;
        drop(entries.remove(project));
        tracing::info!(project, "project unregistered");
        Ok(removed)
    }

    /// Names of all registered projects, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the state directory cannot be read.
    pub fn active(&self) -> Result<Vec<String>, ProjectError> {
        let mut names = self.store.list()?;
        names.extend(
            self.entries()
                .iter()
                .filter(|(_, e)| e.project.is_some())
                .map(|(name, _)| name.clone()),
        );
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn ensure_lock(
        &self,
        entries: &mut HashMap<String, Entry>,
        project: &str,
    ) -> Result<(), LockError> {
        if owns(entries, project) {
            return Ok(());
        }
        let lock = ProjectLock::acquire(&self.lock_dir, project, self.reclaim_stale)?;
        // Anything read before the lock was taken may be stale.
        let entry = entries.entry(project.to_string()).or_default();
        entry.lock = Some(lock);
        entry.project = None;
        Ok(())
    }

    fn cached<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        project: &str,
    ) -> Result<&'a mut ActiveProject, ProjectError> {
        let not_active = || ProjectError::NotActive {
            project: project.to_string(),
        };
        // Without the lock another invocation may have changed the snapshot.
        let fresh =
            owns(entries, project) && entries.get(project).is_some_and(|e| e.project.is_some());
        if !fresh {
            let loaded = self.store.load(project)?;
            let Some(loaded) = loaded else {
                if let Some(entry) = entries.get_mut(project) {
                    entry.project = None;
                }
                return Err(not_active());
            };
            entries.entry(project.to_string()).or_default().project = Some(loaded);
        }
        entries
            .get_mut(project)
            .and_then(|e| e.project.as_mut())
            .ok_or_else(not_active)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owns(entries: &HashMap<String, Entry>, project: &str) -> bool {
    entries.get(project).is_some_and(|e| e.lock.is_some())
}
