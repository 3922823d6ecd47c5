//! Project configuration resolution.
//!
//! Turns a container directory and its environment file into a typed
//! [`ProjectConfig`]. Resolution only reads files; it never touches the
//! container runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stevedore_common::constants::{
    APP_ENV_KEY, BASE_LAYER, DEFAULT_ENV_FILE, FORWARD_DB_PORT_KEY, LOCAL_PACKAGES_LAYER,
    PROJECT_NAME_KEY,
};
use stevedore_common::error::{ConfigError, Result};
use stevedore_common::types::MountMode;

use crate::envfile;
use crate::naming::validate_name;

/// Resolved configuration of one project. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Unique project key, from `COMPOSE_PROJECT_NAME` or an explicit override.
    pub project_name: String,
    /// Directory holding the environment file and compose layers.
    pub container_dir: PathBuf,
    /// Environment file that was read.
    pub env_file_path: PathBuf,
    /// Compose layers in merge order.
    pub layer_paths: Vec<PathBuf>,
    /// Selected mount mode.
    pub mount_mode: MountMode,
    /// All variables from the environment file.
    pub env: BTreeMap<String, String>,
}

impl ProjectConfig {
    /// Expected database host port declared in the environment file.
    #[must_use]
    pub fn forward_db_port(&self) -> Option<u16> {
        self.env
            .get(FORWARD_DB_PORT_KEY)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Resolves [`ProjectConfig`] values from container directories.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    mount_mode: MountMode,
    env_file: Option<PathBuf>,
    project_name: Option<String>,
}

impl ConfigResolver {
    /// Creates a resolver for the given mount mode.
    #[must_use]
    pub fn new(mount_mode: MountMode) -> Self {
        Self {
            mount_mode,
            ..Self::default()
        }
    }

    /// Reads `path` instead of `<container_dir>/.env`. Relative paths
    /// resolve against the container directory.
    #[must_use]
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Uses `name` instead of `COMPOSE_PROJECT_NAME`.
    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Resolves the project living in `container_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvFile`],
    /// [`ConfigError::MalformedLine`] or [`ConfigError::MissingProjectName`]
    /// for a bad environment file, and a naming error if the project name
    /// cannot form container names.
    pub fn resolve(&self, container_dir: &Path) -> Result<ProjectConfig> {
        let env_file_path = self.env_file_path(container_dir);
        let env = envfile::load(&env_file_path)?;

        let declared = env.non_empty(PROJECT_NAME_KEY).map(str::to_string);
        let project_name = match (&self.project_name, declared) {
            (Some(explicit), Some(declared)) if *explicit != declared => {
                tracing::info!(explicit = %explicit, declared = %declared, "project name overridden");
                explicit.clone()
            }
            (_, Some(declared)) => declared,
            (Some(_), None) | (None, None) => {
                return Err(ConfigError::MissingProjectName {
                    path: env_file_path,
                }
                .into());
            }
        };
        validate_name("project", &project_name)?;

        let layer_paths = layer_paths(container_dir, env.non_empty(APP_ENV_KEY), self.mount_mode);
        tracing::debug!(
            project = %project_name,
            mode = %self.mount_mode,
            layers = layer_paths.len(),
            "project configuration resolved"
        );
        Ok(ProjectConfig {
            project_name,
            container_dir: container_dir.to_path_buf(),
            env_file_path,
            layer_paths,
            mount_mode: self.mount_mode,
            env: env.into_vars(),
        })
    }

    fn env_file_path(&self, container_dir: &Path) -> PathBuf {
        match &self.env_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => container_dir.join(path),
            None => container_dir.join(DEFAULT_ENV_FILE),
        }
    }
}

/// Derives the ordered compose layers for a container directory.
///
/// Base first, then `docker-compose.<app_env>.yml` when an environment is
/// selected, then the local-packages override in that mount mode.
#[must_use]
pub fn layer_paths(container_dir: &Path, app_env: Option<&str>, mode: MountMode) -> Vec<PathBuf> {
    let mut layers = vec![container_dir.join(BASE_LAYER)];
    if let Some(app_env) = app_env {
        layers.push(container_dir.join(format!("docker-compose.{app_env}.yml")));
    }
    if mode == MountMode::LocalPackages {
        layers.push(container_dir.join(LOCAL_PACKAGES_LAYER));
    }
    layers
}

#[cfg(test)]
mod tests {
    use stevedore_common::error::StevedoreError;

    use super::*;

    fn project_dir(env: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".env"), env).expect("write env");
        dir
    }

    #[test]
    fn resolves_standard_project() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=viewiemedia\n");
        let config = ConfigResolver::new(MountMode::Standard)
            .resolve(dir.path())
            .expect("resolve");
        assert_eq!(config.project_name, "viewiemedia");
        assert_eq!(config.mount_mode, MountMode::Standard);
        assert_eq!(config.layer_paths, vec![dir.path().join("docker-compose.yml")]);
    }

    #[test]
    fn local_packages_adds_override_layer_last() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=viewiemedia\nAPP_ENV=local\n");
        let config = ConfigResolver::new(MountMode::LocalPackages)
            .resolve(dir.path())
            .expect("resolve");
        assert_eq!(
            config.layer_paths,
            vec![
                dir.path().join("docker-compose.yml"),
                dir.path().join("docker-compose.local.yml"),
                dir.path().join("docker-compose.local-packages.yml"),
            ]
        );
    }

    #[test]
    fn missing_project_name_fails() {
        let dir = project_dir("APP_ENV=local\nCOMPOSE_PROJECT_NAME=  \n");
        let err = ConfigResolver::default().resolve(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            StevedoreError::Config(ConfigError::MissingProjectName { .. })
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn missing_env_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ConfigResolver::default().resolve(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            StevedoreError::Config(ConfigError::MissingEnvFile { .. })
        ));
    }

    #[test]
    fn malformed_line_fails() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=x\nnot a pair\n");
        let err = ConfigResolver::default().resolve(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            StevedoreError::Config(ConfigError::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn custom_env_file_is_relative_to_container_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("staging.env"), "COMPOSE_PROJECT_NAME=shop\n")
            .expect("write");
        let config = ConfigResolver::default()
            .with_env_file("staging.env")
            .resolve(dir.path())
            .expect("resolve");
        assert_eq!(config.env_file_path, dir.path().join("staging.env"));
        assert_eq!(config.project_name, "shop");
    }

    #[test]
    fn explicit_project_name_wins() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=shop\n");
        let config = ConfigResolver::default()
            .with_project_name("shop-review")
            .resolve(dir.path())
            .expect("resolve");
        assert_eq!(config.project_name, "shop-review");
    }

    #[test]
    fn re_resolving_reads_the_file_again() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=one\n");
        let resolver = ConfigResolver::default();
        assert_eq!(resolver.resolve(dir.path()).expect("first").project_name, "one");
        std::fs::write(dir.path().join(".env"), "COMPOSE_PROJECT_NAME=two\n").expect("write");
        assert_eq!(resolver.resolve(dir.path()).expect("second").project_name, "two");
    }

    #[test]
    fn forward_db_port_is_parsed() {
        let dir = project_dir("COMPOSE_PROJECT_NAME=shop\nFORWARD_DB_PORT=33060\n");
        let config = ConfigResolver::default().resolve(dir.path()).expect("resolve");
        assert_eq!(config.forward_db_port(), Some(33060));
    }
}
