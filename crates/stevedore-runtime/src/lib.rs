//! # stevedore-runtime
//!
//! Everything that touches the container runtime or shared state:
//!
//! - **Backend**: the [`backend::ContainerRuntime`] trait and the Docker CLI implementation.
//! - **Registry**: active projects, persisted snapshots and advisory locks.
//! - **Launcher**: dependency-ordered start with readiness and rollback, and stop.
//! - **Dispatch**: commands inside running containers.
//! - **Interrupt**: forwarding ctrl-C to child processes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod backoff;
pub mod dispatch;
pub mod interrupt;
pub mod launcher;
pub mod lock;
pub mod ports;
pub mod readiness;
pub mod registry;
pub mod state;
