//! `stv start`: bring a project up in dependency order.

use anyhow::Context as _;
use clap::Args;
use stevedore_common::constants::DATABASE_SERVICE;
use stevedore_common::types::MountMode;

use super::{Context, ProjectArgs, seconds};
use crate::output;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Bind packages from LOCAL_PACKAGES_PATH instead of the vendored copy.
    #[arg(short = 'p', long)]
    pub local_packages: bool,

    /// Leave started services running if a later one fails.
    #[arg(long, env = "STEVEDORE_KEEP_PARTIAL")]
    pub keep_partial: bool,

    /// Replace the project lock if its holder is gone.
    #[arg(long)]
    pub reclaim_stale: bool,

    /// Seconds each dependency level may take to become ready.
    #[arg(long, value_name = "SECS", env = "STEVEDORE_READY_TIMEOUT")]
    pub ready_timeout: Option<u64>,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the project is
/// locked or in an incompatible state, or a service fails to start.
pub fn execute(args: &StartArgs, ctx: &Context) -> anyhow::Result<()> {
    let mode = if args.local_packages {
        MountMode::LocalPackages
    } else {
        MountMode::Standard
    };
    let config = args.project.resolve(mode)?;

    let mut ctx = ctx.clone();
    ctx.config.keep_partial |= args.keep_partial;
    ctx.config.reclaim_stale |= args.reclaim_stale;
    if let Some(ceiling) = seconds(args.ready_timeout) {
        ctx.config.readiness = ctx.config.readiness.with_ceiling(ceiling);
    }

    let launcher = ctx.launcher()?;
    tracing::info!(project = %config.project_name, mode = %mode, "starting project");
    let project = launcher
        .start(&config)
        .with_context(|| format!("starting {}", config.project_name))?;
    output::print(&output::render_project(&project, chrono::Utc::now()));

    if project.service(DATABASE_SERVICE).is_some() {
        match launcher.ports(project.name(), DATABASE_SERVICE) {
            Ok(ports) => report_db_port(ports.first_tcp_host_port(), config.forward_db_port()),
            Err(err) => tracing::warn!(error = %err, "could not inspect database ports"),
        }
    }
    Ok(())
}

fn report_db_port(published: Option<u16>, expected: Option<u16>) {
    match (published, expected) {
        (Some(port), Some(expected)) if port != expected => tracing::warn!(
            published = port,
            expected,
            "database host port differs from FORWARD_DB_PORT"
        ),
        (Some(port), _) => output::print(&format!("database available on host port {port}\n")),
        (None, Some(expected)) => tracing::warn!(
            expected,
            "database publishes no host port but FORWARD_DB_PORT is set"
        ),
        (None, None) => {}
    }
}
