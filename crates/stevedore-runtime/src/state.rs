//! Persistent project state.
//!
//! Keeps one JSON snapshot per active project under
//! `<state_dir>/projects/`, so that later invocations can find what an
//! earlier one started.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use stevedore_common::error::ProjectError;

use crate::registry::ActiveProject;

const PROJECTS_DIR: &str = "projects";

/// Directory-backed store of [`ActiveProject`] snapshots.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Opens the store rooted at `state_dir`. Nothing is created until the
    /// first save.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(PROJECTS_DIR),
        }
    }

    /// Snapshot file for `project`.
    #[must_use]
    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{project}.json"))
    }

    /// Loads the snapshot for `project`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::CorruptState`] if the snapshot cannot be
    /// decoded.
    pub fn load(&self, project: &str) -> Result<Option<ActiveProject>, ProjectError> {
        let path = self.path_for(project);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ProjectError::Io { path, source }),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| ProjectError::CorruptState { path, source })
    }

    /// Persists `project` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the snapshot cannot be written.
    pub fn save(&self, project: &ActiveProject) -> Result<(), ProjectError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ProjectError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let path = self.path_for(&project.config.project_name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(project).map_err(|e| ProjectError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&body)
            .and_then(|()| file.sync_all())
            .map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        tracing::debug!(project = %project.config.project_name, path = %path.display(), "project state saved");
        Ok(())
    }

    /// Deletes the snapshot for `project`. Missing snapshots are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the file exists but cannot be removed.
    pub fn remove(&self, project: &str) -> Result<(), ProjectError> {
        let path = self.path_for(project);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ProjectError::Io { path, source }),
        }
    }

    /// Names of all projects with a snapshot, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>, ProjectError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ProjectError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ProjectError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use stevedore_common::types::{ContainerName, MountMode, ProjectState, ServiceStatus};
    use stevedore_compose::project::ProjectConfig;

    use super::*;
    use crate::registry::ServiceContainer;

    fn project(name: &str) -> ActiveProject {
        ActiveProject {
            config: ProjectConfig {
                project_name: name.into(),
                container_dir: PathBuf::from("/srv/app/container"),
                env_file_path: PathBuf::from("/srv/app/container/.env"),
                layer_paths: vec![PathBuf::from("/srv/app/container/docker-compose.yml")],
                mount_mode: MountMode::LocalPackages,
                env: BTreeMap::new(),
            },
            services: vec![ServiceContainer {
                logical_name: "db".into(),
                container_name: ContainerName::new(format!("{name}_db")),
                status: ServiceStatus::Running,
            }],
            started_at: Utc::now(),
            state: ProjectState::Running,
            lock_holder: None,
        }
    }

    #[test]
    fn save_load_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        assert!(store.load("shop").expect("load").is_none());

        store.save(&project("shop")).expect("save");
        let loaded = store.load("shop").expect("load").expect("present");
        assert_eq!(loaded.config.mount_mode, MountMode::LocalPackages);
        assert_eq!(loaded.services[0].container_name.as_str(), "shop_db");

        store.remove("shop").expect("remove");
        assert!(store.load("shop").expect("load").is_none());
        store.remove("shop").expect("second remove is a no-op");
    }

    #[test]
    fn list_is_sorted_and_skips_temporaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        store.save(&project("zeta")).expect("save");
        store.save(&project("alpha")).expect("save");
        fs::write(store.path_for("beta").with_extension("json.tmp"), "{}").expect("tmp");
        assert_eq!(store.list().expect("list"), ["alpha", "zeta"]);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        fs::create_dir_all(dir.path().join("projects")).expect("mkdir");
        fs::write(store.path_for("shop"), "{ not json").expect("write");
        assert!(matches!(
            store.load("shop"),
            Err(ProjectError::CorruptState { .. })
        ));
    }
}
