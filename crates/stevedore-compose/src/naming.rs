//! Deterministic container naming.
//!
//! A container is named `<project>_<service>`. The set of services is fixed
//! when the registry is built, so ambiguous names are rejected there rather
//! than on lookup.

use std::collections::HashMap;

use stevedore_common::constants::CONTAINER_NAME_SEPARATOR;
use stevedore_common::error::NamingError;
use stevedore_common::types::ContainerName;

/// Derives the container name for a logical service. Pure; performs no validation.
#[must_use]
pub fn container_name(project: &str, service: &str) -> ContainerName {
    ContainerName::new(format!("{project}{CONTAINER_NAME_SEPARATOR}{service}"))
}

/// Checks that `name` can be part of a container name.
///
/// Container runtimes accept `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
///
/// # Errors
///
/// Returns [`NamingError::InvalidName`] if the name is empty or contains
/// characters the runtime rejects.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), NamingError> {
    let invalid = |reason| NamingError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("must not be empty")),
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(invalid("must start with a letter or digit"));
        }
        Some(_) => {}
    }
    if chars.any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))) {
        return Err(invalid("may only contain letters, digits, '_', '.' and '-'"));
    }
    Ok(())
}

/// Maps the logical services of one project to container names.
#[derive(Debug, Clone)]
pub struct ContainerNameRegistry {
    project: String,
    entries: Vec<(String, ContainerName)>,
}

impl ContainerNameRegistry {
    /// Builds the registry for `project` and its declared services.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::InvalidName`] for an unusable project or
    /// service name and [`NamingError::DuplicateContainerName`] when two
    /// services resolve to the same container.
    pub fn new<I, S>(project: &str, services: I) -> Result<Self, NamingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_name("project", project)?;
        let mut seen: HashMap<ContainerName, String> = HashMap::new();
        let mut entries = Vec::new();
        for service in services {
            let service = service.into();
            validate_name("service", &service)?;
            let name = container_name(project, &service);
            if let Some(first) = seen.get(&name) {
                return Err(NamingError::DuplicateContainerName {
                    container: name.to_string(),
                    first: first.clone(),
                    second: service,
                });
            }
            let _ = seen.insert(name.clone(), service.clone());
            entries.push((service, name));
        }
        Ok(Self {
            project: project.to_string(),
            entries,
        })
    }

    /// Resolves a logical service to its container name.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownService`] if the service was not declared.
    pub fn resolve(&self, service: &str) -> Result<ContainerName, NamingError> {
        self.entries
            .iter()
            .find(|(s, _)| s == service)
            .map(|(_, name)| name.clone())
            .ok_or_else(|| NamingError::UnknownService {
                project: self.project.clone(),
                service: service.to_string(),
            })
    }

    /// Project the registry was built for.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Declared services in declaration order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    /// `(service, container)` pairs in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ContainerName)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_project_underscore_service() {
        let cases = [
            ("viewiemedia", "web"),
            ("a", "b"),
            ("shop-2", "queue.worker"),
            ("X9", "db"),
        ];
        for (project, service) in cases {
            assert_eq!(
                container_name(project, service).as_str(),
                format!("{project}_{service}")
            );
        }
    }

    #[test]
    fn registry_resolves_declared_service() {
        let registry =
            ContainerNameRegistry::new("viewiemedia", ["web", "db"]).expect("valid registry");
        assert_eq!(
            registry.resolve("web").expect("web").as_str(),
            "viewiemedia_web"
        );
        assert_eq!(registry.resolve("db").expect("db").as_str(), "viewiemedia_db");
    }

    #[test]
    fn unknown_service_is_rejected() {
        let registry = ContainerNameRegistry::new("viewiemedia", ["web", "db"]).expect("valid");
        let err = registry.resolve("worker").unwrap_err();
        assert!(matches!(err, NamingError::UnknownService { ref service, .. } if service == "worker"));
    }

    #[test]
    fn duplicate_service_is_rejected_at_build_time() {
        let err = ContainerNameRegistry::new("p", ["web", "db", "web"]).unwrap_err();
        match err {
            NamingError::DuplicateContainerName { container, .. } => {
                assert_eq!(container, "p_web");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(ContainerNameRegistry::new("", ["web"]).is_err());
        assert!(ContainerNameRegistry::new("p", ["-web"]).is_err());
        assert!(ContainerNameRegistry::new("p", ["we b"]).is_err());
        assert!(validate_name("service", "php_fpm").is_ok());
    }

    #[test]
    fn services_keep_declaration_order() {
        let registry = ContainerNameRegistry::new("p", ["web", "db", "worker"]).expect("valid");
        let services: Vec<_> = registry.services().collect();
        assert_eq!(services, ["web", "db", "worker"]);
    }
}
