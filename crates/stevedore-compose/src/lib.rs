//! # stevedore-compose
//!
//! Static side of project orchestration. Nothing in this crate talks to the
//! container runtime.
//!
//! Handles:
//! - **Envfile**: `KEY=VALUE` environment file parsing.
//! - **Project**: resolution of a container directory into a `ProjectConfig`.
//! - **Naming**: deterministic `<project>_<service>` container names.
//! - **Layer**: ordered merging of base, environment and local-mount layers.
//! - **Graph**: `depends_on` DAG and start levels.
//! - **Plan**: all of the above combined for one project.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod envfile;
pub mod graph;
pub mod layer;
pub mod naming;
pub mod plan;
pub mod project;
