//! Launch plans: everything `start` needs, computed without the runtime.

use stevedore_common::error::Result;

use crate::graph;
use crate::layer::{self, MergedLayer, ServiceSpec};
use crate::naming::ContainerNameRegistry;
use crate::project::ProjectConfig;

/// Merged layer, container names and start levels for a project.
#[derive(Debug, Clone)]
pub struct ComposePlan {
    /// Configuration the plan was built from.
    pub config: ProjectConfig,
    /// Effective compose definition, with container names applied.
    pub merged: MergedLayer,
    /// Declared services in declaration order.
    pub services: Vec<ServiceSpec>,
    /// Container name for every service.
    pub names: ContainerNameRegistry,
    /// Services grouped by dependency depth.
    pub levels: Vec<Vec<String>>,
}

impl ComposePlan {
    /// Builds the plan for `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing, invalid or conflicting
    /// layers and dependency cycles, and a naming error for unusable or
    /// undeclared service names.
    pub fn build(config: &ProjectConfig) -> Result<Self> {
        let mut merged = layer::merge(&config.layer_paths)?;
        let services = merged.services()?;
        let names = ContainerNameRegistry::new(
            &config.project_name,
            services.iter().map(|s| s.name.clone()),
        )?;
        let levels = graph::start_levels(&config.project_name, &services)?;
        merged.apply_container_names(&names);
        Ok(Self {
            config: config.clone(),
            merged,
            services,
            names,
            levels,
        })
    }

    /// Services in start order: level by level, declaration order within a level.
    pub fn start_order(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().flatten().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use stevedore_common::types::MountMode;

    use super::*;
    use crate::layer::LayerValue;
    use crate::project::ConfigResolver;

    const BASE: &str = r"
services:
  web:
    image: viewiemedia/web
    ports:
      - '8080:80'
    volumes:
      - ./packages:/var/www/packages
      - ./src:/var/www/html
    depends_on:
      - db
  db:
    image: mysql:8
";

    const LOCAL_PACKAGES: &str = r"
services:
  web:
    volumes:
      - ${LOCAL_PACKAGES_PATH}:/var/www/packages
      - ./src:/var/www/html
";

    fn write_project(dir: &Path) {
        std::fs::write(
            dir.join(".env"),
            "COMPOSE_PROJECT_NAME=viewiemedia\nLOCAL_PACKAGES_PATH=/home/dev/packages\n",
        )
        .expect("env");
        std::fs::write(dir.join("docker-compose.yml"), BASE).expect("base");
        std::fs::write(dir.join("docker-compose.local-packages.yml"), LOCAL_PACKAGES)
            .expect("override");
    }

    fn plan(dir: &Path, mode: MountMode) -> ComposePlan {
        let config = ConfigResolver::new(mode).resolve(dir).expect("resolve");
        ComposePlan::build(&config).expect("plan")
    }

    #[test]
    fn plan_names_containers_and_orders_levels() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_project(dir.path());
        let plan = plan(dir.path(), MountMode::Standard);
        assert_eq!(plan.names.resolve("web").expect("web").as_str(), "viewiemedia_web");
        assert_eq!(plan.start_order().collect::<Vec<_>>(), ["db", "web"]);
    }

    #[test]
    fn local_packages_only_changes_mounts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_project(dir.path());
        let standard = plan(dir.path(), MountMode::Standard);
        let local = plan(dir.path(), MountMode::LocalPackages);

        let local_merged = local.merged.interpolate(&local.config.env);
        let volumes = local_merged
            .services()
            .expect("services")
            .into_iter()
            .find(|s| s.name == "web")
            .expect("web")
            .volumes;
        assert_eq!(volumes[0], "/home/dev/packages:/var/www/packages");

        let strip_volumes = |value: &LayerValue| -> LayerValue {
            let LayerValue::Mapping(services) = value else {
                return value.clone();
            };
            LayerValue::Mapping(
                services
                    .iter()
                    .map(|(name, def)| {
                        let def = match def {
                            LayerValue::Mapping(fields) => LayerValue::Mapping(
                                fields.iter().filter(|(k, _)| k != "volumes").cloned().collect(),
                            ),
                            other => other.clone(),
                        };
                        (name.clone(), def)
                    })
                    .collect(),
            )
        };
        let standard_services = standard.merged.get(&["services"]).expect("services");
        let local_services = local.merged.get(&["services"]).expect("services");
        assert_eq!(strip_volumes(standard_services), strip_volumes(local_services));
    }

    #[test]
    fn missing_override_layer_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_project(dir.path());
        std::fs::remove_file(dir.path().join("docker-compose.local-packages.yml")).expect("rm");
        let config = ConfigResolver::new(MountMode::LocalPackages)
            .resolve(dir.path())
            .expect("resolve");
        let err = ComposePlan::build(&config).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("docker-compose.local-packages.yml"));
    }
}
