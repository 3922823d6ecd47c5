//! `stv stop`: stop every container of a project and forget it.

use anyhow::Context as _;
use clap::Args;

use super::{Context, ProjectArgs};
use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Replace the project lock if its holder is gone.
    #[arg(long)]
    pub reclaim_stale: bool,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the project is not active, is locked by another
/// invocation, or some container could not be stopped.
pub fn execute(args: &StopArgs, ctx: &Context) -> anyhow::Result<()> {
    let name = args.project.project_name()?;
    let mut ctx = ctx.clone();
    ctx.config.reclaim_stale |= args.reclaim_stale;

    tracing::info!(project = %name, "stopping project");
    let report = ctx
        .launcher()?
        .stop(&name)
        .with_context(|| format!("stopping {name}"))?;
    output::print(&output::render_stop(&name, &report));
    Ok(())
}
