//! Error taxonomy for the stevedore workspace.
//!
//! Each category is its own enum so callers can match on the class of
//! failure. [`StevedoreError`] unifies them and maps every category to the
//! stable exit code the CLI reports.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{LockHolder, MountMode, ProjectState, ServiceStatus};

/// Exit code for configuration and naming errors.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code for runtime, launcher and dispatch errors.
pub const EXIT_RUNTIME: i32 = 2;
/// Exit code when a dispatched command exited nonzero.
pub const EXIT_COMMAND_FAILED: i32 = 3;
/// Exit code for lock contention.
pub const EXIT_LOCK: i32 = 4;

/// Malformed or missing environment and layer files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment file does not exist.
    #[error("environment file not found: {path}")]
    MissingEnvFile {
        /// Expected location of the file.
        path: PathBuf,
    },

    /// `COMPOSE_PROJECT_NAME` is absent or empty.
    #[error("COMPOSE_PROJECT_NAME is missing or empty in {path}")]
    MissingProjectName {
        /// Environment file that was read.
        path: PathBuf,
    },

    /// A non-comment line has no `=` or an empty key.
    #[error("malformed line {line} in {path}: {content:?}")]
    MalformedLine {
        /// Environment file containing the line.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Raw line content.
        content: String,
    },

    /// A declared compose layer does not exist.
    #[error("compose layer not found: {path}")]
    LayerNotFound {
        /// Declared layer path.
        path: PathBuf,
    },

    /// Two layers disagree on the type of a field.
    #[error("conflicting type for `{field}` in {path}: earlier layers declare a {expected}, this layer a {found}")]
    ConflictingType {
        /// Dotted path of the field.
        field: String,
        /// Layer introducing the conflict.
        path: PathBuf,
        /// Type declared by earlier layers.
        expected: &'static str,
        /// Type declared by this layer.
        found: &'static str,
    },

    /// A layer file is not valid YAML or has an unexpected shape.
    #[error("invalid compose layer {path}: {message}")]
    InvalidLayer {
        /// Offending layer.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Services depend on each other in a cycle.
    #[error("cyclic depends_on involving service \"{service}\"")]
    CyclicDependency {
        /// A service on the cycle.
        service: String,
    },

    /// Reading a configuration file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Unknown or ambiguous service names.
#[derive(Debug, Error)]
pub enum NamingError {
    /// The service is not declared for the project.
    #[error("unknown service \"{service}\" in project \"{project}\"")]
    UnknownService {
        /// Project that was queried.
        project: String,
        /// Requested logical service.
        service: String,
    },

    /// Two logical services resolve to the same container name.
    #[error("services \"{first}\" and \"{second}\" both resolve to container {container}")]
    DuplicateContainerName {
        /// Colliding container name.
        container: String,
        /// First service declaring it.
        first: String,
        /// Second service declaring it.
        second: String,
    },

    /// A project or service name cannot form a container name.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        /// Whether a project or a service name was rejected.
        kind: &'static str,
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Registry membership failures.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// An entry for the project already exists.
    #[error("project \"{project}\" is already active")]
    AlreadyActive {
        /// Project name.
        project: String,
    },

    /// No entry exists for the project.
    #[error("project \"{project}\" is not active")]
    NotActive {
        /// Project name.
        project: String,
    },

    /// A persisted project snapshot could not be decoded.
    #[error("corrupt project state at {path}: {source}")]
    CorruptState {
        /// Snapshot file.
        path: PathBuf,
        /// Decoding error.
        source: serde_json::Error,
    },

    /// Reading or writing project state failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Advisory lock contention.
#[derive(Debug, Error)]
pub enum LockError {
    /// A live process holds the lock.
    #[error("project \"{project}\" is locked by {holder}")]
    HeldByOther {
        /// Project name.
        project: String,
        /// Current holder.
        holder: LockHolder,
    },

    /// The recorded holder is no longer live; reclamation must be requested.
    #[error("project \"{project}\" has a stale lock from {holder}; rerun with --reclaim-stale or `stv unlock`")]
    Stale {
        /// Project name.
        project: String,
        /// Dead holder.
        holder: LockHolder,
    },

    /// The lock file exists but cannot be parsed.
    #[error("unreadable lock file {path}")]
    Corrupt {
        /// Lock file path.
        path: PathBuf,
    },

    /// Creating, reading or removing the lock file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Container runtime and launcher failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime daemon could not be reached.
    #[error("container runtime unavailable: {message}")]
    DaemonUnavailable {
        /// Runtime diagnostic.
        message: String,
    },

    /// The runtime binary is not installed.
    #[error("container runtime binary `{binary}` not found on PATH")]
    BinaryNotFound {
        /// Binary that was looked up.
        binary: String,
    },

    /// A service did not become ready; partial state was rolled back unless kept.
    #[error("project \"{project}\" failed to start: service \"{service}\" {reason}")]
    StartFailed {
        /// Project name.
        project: String,
        /// First failing service.
        service: String,
        /// Why the service failed.
        reason: String,
    },

    /// The start was cancelled by an interrupt before every level was ready.
    #[error("start of project \"{project}\" was interrupted")]
    Interrupted {
        /// Project name.
        project: String,
    },

    /// The project runs in a different mount mode.
    #[error("project \"{project}\" is running in {running} mode, requested {requested}; stop it first")]
    ModeMismatch {
        /// Project name.
        project: String,
        /// Mode of the running project.
        running: MountMode,
        /// Mode that was requested.
        requested: MountMode,
    },

    /// An earlier start or stop left the project partially up.
    #[error("project \"{project}\" is {state} after an interrupted operation; stop it before starting again")]
    Degraded {
        /// Project name.
        project: String,
        /// Recorded project state.
        state: ProjectState,
    },

    /// Some containers could not be stopped.
    #[error("project \"{project}\" stopped with failures: {}", containers.join(", "))]
    StopFailed {
        /// Project name.
        project: String,
        /// Containers that failed to stop.
        containers: Vec<String>,
    },

    /// A runtime invocation exited unsuccessfully.
    #[error("`{command}` failed with status {code}: {stderr}")]
    CommandFailed {
        /// Rendered invocation.
        command: String,
        /// Exit status.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// A runtime invocation produced output that could not be parsed.
    #[error("unexpected runtime output for {query}: {output:?}")]
    UnexpectedOutput {
        /// Query that was issued.
        query: String,
        /// Raw output.
        output: String,
    },

    /// Spawning or waiting on the runtime process failed.
    #[error("I/O error running {command}: {source}")]
    Io {
        /// Rendered invocation.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Failures dispatching a command into a container.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The target service is not `Running`.
    #[error("container {container} is not running (status: {status})")]
    ContainerNotRunning {
        /// Target container.
        container: String,
        /// Recorded status.
        status: ServiceStatus,
    },

    /// The runtime could not start the command.
    #[error("could not launch command in {container}: {reason}")]
    LaunchFailed {
        /// Target container.
        container: String,
        /// Runtime diagnostic.
        reason: String,
    },

    /// The command exceeded its timeout and was killed.
    #[error("command in {container} timed out after {after:?}")]
    TimedOut {
        /// Target container.
        container: String,
        /// Configured timeout.
        after: Duration,
    },

    /// No command was given.
    #[error("no command given")]
    EmptyCommand,
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StevedoreError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Naming failure.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Registry failure.
    #[error(transparent)]
    Project(#[from] ProjectError),
    /// Lock contention.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Dispatch failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl StevedoreError {
    /// Returns the documented process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Naming(_) => EXIT_CONFIG,
            Self::Lock(_) => EXIT_LOCK,
            Self::Project(_) | Self::Runtime(_) | Self::Dispatch(_) => EXIT_RUNTIME,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StevedoreError>;
