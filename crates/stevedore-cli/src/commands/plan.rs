//! `stv plan`: show what `start` would do without touching the runtime.

use clap::Args;
use stevedore_common::types::MountMode;
use stevedore_compose::plan::ComposePlan;

use super::ProjectArgs;
use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Plan with the local-packages layer.
    #[arg(short = 'p', long)]
    pub local_packages: bool,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the environment file or compose layers are invalid.
pub fn execute(args: &PlanArgs) -> anyhow::Result<()> {
    let mode = if args.local_packages {
        MountMode::LocalPackages
    } else {
        MountMode::Standard
    };
    let config = args.project.resolve(mode)?;
    let plan = ComposePlan::build(&config)?;
    output::print(&output::render_plan(&plan));
    Ok(())
}
