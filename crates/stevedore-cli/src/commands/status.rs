//! `stv status`: re-inspect containers and show project state.

use clap::Args;

use super::{Context, ProjectArgs};
use crate::output;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Show every active project.
    #[arg(short, long, conflicts_with = "project")]
    pub all: bool,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if a project is not active or the runtime cannot be
/// queried.
pub fn execute(args: &StatusArgs, ctx: &Context) -> anyhow::Result<()> {
    let launcher = ctx.launcher()?;
    let names = if args.all {
        launcher.registry().active()?
    } else {
        vec![args.project.project_name()?]
    };
    if names.is_empty() {
        output::print("no active projects\n");
        return Ok(());
    }

    let now = chrono::Utc::now();
    for name in names {
        let project = launcher.refresh(&name)?;
        output::print(&output::render_project(&project, now));
    }
    Ok(())
}
