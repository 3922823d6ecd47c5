//! Dependency graph management using `petgraph`.
//!
//! Builds a directed acyclic graph from `depends_on` declarations and
//! groups services into start levels: every service in a level depends only
//! on services in earlier levels.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use stevedore_common::error::{ConfigError, NamingError, StevedoreError};

use crate::layer::ServiceSpec;

/// A dependency graph of services.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Internal petgraph representation. Node indices follow declaration order.
    graph: petgraph::Graph<String, ()>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
        }
    }

    /// Builds the graph for `services`, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownService`] if a `depends_on` entry names
    /// an undeclared service.
    pub fn from_services(project: &str, services: &[ServiceSpec]) -> Result<Self, NamingError> {
        let mut graph = Self::new();
        let mut nodes = HashMap::new();
        for spec in services {
            let _ = nodes.insert(spec.name.as_str(), graph.add_service(&spec.name));
        }
        for spec in services {
            let dependent = nodes[spec.name.as_str()];
            for dep in &spec.depends_on {
                let dependency =
                    *nodes
                        .get(dep.as_str())
                        .ok_or_else(|| NamingError::UnknownService {
                            project: project.to_string(),
                            service: dep.clone(),
                        })?;
                graph.add_dependency(dependent, dependency);
            }
        }
        Ok(graph)
    }

    /// Adds a service node to the graph.
    pub fn add_service(&mut self, name: impl Into<String>) -> NodeIndex {
        self.graph.add_node(name.into())
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent`
    /// so that topological sort yields dependencies first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        let _ = self.graph.update_edge(dependency, dependent, ());
    }

    /// Returns a topological ordering of services, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CyclicDependency`] if the graph contains cycles.
    pub fn resolve_order(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .sorted()?
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx).cloned())
            .collect())
    }

    /// Groups services by dependency depth.
    ///
    /// Level 0 holds services without dependencies; a service sits one level
    /// above its deepest dependency. Within a level services keep their
    /// declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CyclicDependency`] if the graph contains cycles.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, ConfigError> {
        let order = self.sorted()?;
        let mut depth = vec![0_usize; self.graph.node_count()];
        for &idx in &order {
            depth[idx.index()] = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);
        }
        let mut levels: Vec<Vec<String>> = Vec::new();
        for idx in self.graph.node_indices() {
            let d = depth[idx.index()];
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(self.graph[idx].clone());
        }
        Ok(levels)
    }

    fn sorted(&self) -> Result<Vec<NodeIndex>, ConfigError> {
        petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            ConfigError::CyclicDependency {
                service: self.graph[cycle.node_id()].clone(),
            }
        })
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the graph for `services` and returns its start levels.
///
/// # Errors
///
/// Returns a naming error for undeclared dependencies and a configuration
/// error for cycles.
pub fn start_levels(project: &str, services: &[ServiceSpec]) -> Result<Vec<Vec<String>>, StevedoreError> {
    let graph = DependencyGraph::from_services(project, services)?;
    let levels = graph.levels()?;
    tracing::debug!(project, ?levels, "start levels resolved");
    Ok(levels)
}
