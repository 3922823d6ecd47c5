//! CLI command definitions and dispatch.

pub mod exec;
pub mod plan;
pub mod ports;
pub mod start;
pub mod status;
pub mod stop;
pub mod unlock;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use stevedore_common::config::StevedoreConfig;
use stevedore_common::constants::DEFAULT_RUNTIME_BINARY;
use stevedore_common::error::{
    ConfigError, DispatchError, EXIT_CONFIG, EXIT_LOCK, EXIT_RUNTIME, LockError, NamingError,
    ProjectError, RuntimeError, StevedoreError,
};
use stevedore_common::types::MountMode;
use stevedore_compose::project::{ConfigResolver, ProjectConfig};
use stevedore_runtime::backend::ContainerRuntime;
use stevedore_runtime::backend::docker::DockerCli;
use stevedore_runtime::dispatch::CommandDispatcher;
use stevedore_runtime::launcher::{ComposeLauncher, LaunchOptions};
use stevedore_runtime::registry::ProjectRegistry;

/// stevedore: dependency-ordered compose projects and in-container commands.
#[derive(Parser, Debug)]
#[command(name = "stv", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding persisted project state.
    #[arg(long, global = true, env = "STEVEDORE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory holding per-project lock files.
    #[arg(long, global = true, env = "STEVEDORE_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Container runtime binary.
    #[arg(long = "runtime", global = true, env = "STEVEDORE_RUNTIME", default_value = DEFAULT_RUNTIME_BINARY)]
    pub runtime_binary: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "STEVEDORE_LOG_JSON")]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start every service of a project in dependency order.
    Start(start::StartArgs),
    /// Stop every container of a project.
    Stop(stop::StopArgs),
    /// Run a command inside a service container.
    Exec(exec::ExecArgs),
    /// Show the state of active projects.
    Status(status::StatusArgs),
    /// Show the host ports a service publishes.
    Ports(ports::PortsArgs),
    /// Print the start levels and container names without starting anything.
    Plan(plan::PlanArgs),
    /// Remove a stale project lock.
    Unlock(unlock::UnlockArgs),
}

/// Where a project lives and how it is named.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Container directory holding the environment file and compose layers.
    #[arg(long, default_value = ".", env = "STEVEDORE_DIR")]
    pub dir: PathBuf,

    /// Project name, overriding COMPOSE_PROJECT_NAME.
    #[arg(long, env = "STEVEDORE_PROJECT")]
    pub project: Option<String>,

    /// Environment file, relative to the container directory.
    #[arg(long = "env", value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

impl ProjectArgs {
    /// Reads the environment file and resolves the project configuration.
    ///
    /// # Errors
    ///
    /// Returns configuration and naming errors from the resolver.
    pub fn resolve(&self, mode: MountMode) -> Result<ProjectConfig, StevedoreError> {
        let mut resolver = ConfigResolver::new(mode);
        if let Some(env_file) = &self.env_file {
            resolver = resolver.with_env_file(env_file);
        }
        if let Some(project) = &self.project {
            resolver = resolver.with_project_name(project);
        }
        resolver.resolve(&self.dir)
    }

    /// Name of the project to operate on. `--project` skips the environment file.
    ///
    /// # Errors
    ///
    /// Returns configuration errors when the name has to come from the
    /// environment file and cannot.
    pub fn project_name(&self) -> Result<String, StevedoreError> {
        match &self.project {
            Some(name) => Ok(name.clone()),
            None => Ok(self.resolve(MountMode::Standard)?.project_name),
        }
    }
}

/// Global settings plus the runtime wiring shared by the subcommands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: StevedoreConfig,
}

impl Context {
    /// Applies the global flags over the defaults.
    #[must_use]
    pub fn from_cli(cli: &Cli) -> Self {
        let mut config = StevedoreConfig::default();
        if let Some(dir) = &cli.state_dir {
            config.state_dir.clone_from(dir);
        }
        if let Some(dir) = &cli.lock_dir {
            config.lock_dir.clone_from(dir);
        }
        config.runtime_binary.clone_from(&cli.runtime_binary);
        Self { config }
    }

    /// Project registry backed by the configured state and lock directories.
    #[must_use]
    pub fn registry(&self) -> Arc<ProjectRegistry> {
        Arc::new(
            ProjectRegistry::new(&self.config.state_dir, &self.config.lock_dir)
                .reclaim_stale(self.config.reclaim_stale),
        )
    }

    /// Docker CLI backend; rendered compose files live under the state directory.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::BinaryNotFound`] if the runtime binary is not on `PATH`.
    pub fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>, StevedoreError> {
        let work_dir = self.config.state_dir.join("compose");
        Ok(Arc::new(DockerCli::new(&self.config.runtime_binary, work_dir)?))
    }

    /// Launcher wired to the runtime and a fresh registry.
    ///
    /// # Errors
    ///
    /// See [`Context::runtime`].
    pub fn launcher(&self) -> Result<ComposeLauncher, StevedoreError> {
        Ok(ComposeLauncher::new(
            self.runtime()?,
            self.registry(),
            LaunchOptions::from_config(&self.config),
        ))
    }

    /// Dispatcher wired to the runtime and a fresh registry.
    ///
    /// # Errors
    ///
    /// See [`Context::runtime`].
    pub fn dispatcher(&self) -> Result<CommandDispatcher, StevedoreError> {
        Ok(CommandDispatcher::new(self.runtime()?, self.registry())
            .with_default_timeout(self.config.exec_timeout))
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let ctx = Context::from_cli(&cli);
    tracing::debug!(state_dir = %ctx.config.state_dir.display(), "using state directory");
    match cli.command {
        Command::Start(args) => start::execute(&args, &ctx).map(|()| ExitCode::SUCCESS),
        Command::Stop(args) => stop::execute(&args, &ctx).map(|()| ExitCode::SUCCESS),
        Command::Exec(args) => exec::execute(args, &ctx),
        Command::Status(args) => status::execute(&args, &ctx).map(|()| ExitCode::SUCCESS),
        Command::Ports(args) => ports::execute(&args, &ctx).map(|()| ExitCode::SUCCESS),
        Command::Plan(args) => plan::execute(&args).map(|()| ExitCode::SUCCESS),
        Command::Unlock(args) => unlock::execute(&args, &ctx).map(|()| ExitCode::SUCCESS),
    }
}

/// Exit code documented for the first stevedore error in `err`'s chain.
#[must_use]
pub fn exit_code_of(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<StevedoreError>() {
                Some(e.exit_code())
            } else if cause.is::<ConfigError>() || cause.is::<NamingError>() {
                Some(EXIT_CONFIG)
            } else if cause.is::<LockError>() {
                Some(EXIT_LOCK)
            } else if cause.is::<ProjectError>()
                || cause.is::<RuntimeError>()
                || cause.is::<DispatchError>()
            {
                Some(EXIT_RUNTIME)
            } else {
                None
            }
        })
        .unwrap_or(EXIT_RUNTIME)
}

/// Seconds given on the command line.
pub(crate) fn seconds(secs: Option<u64>) -> Option<std::time::Duration> {
    secs.map(std::time::Duration::from_secs)
}
