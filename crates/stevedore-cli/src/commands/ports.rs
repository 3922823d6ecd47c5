//! `stv ports`: host ports published by one service.

use clap::Args;

use super::{Context, ProjectArgs};
use crate::output;

/// Arguments for the `ports` command.
#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Logical service name.
    pub service: String,
}

/// Executes the `ports` command.
///
/// # Errors
///
/// Returns an error if the project or service is unknown or the runtime
/// cannot be queried.
pub fn execute(args: &PortsArgs, ctx: &Context) -> anyhow::Result<()> {
    let name = args.project.project_name()?;
    let ports = ctx.launcher()?.ports(&name, &args.service)?;
    output::print(&output::render_ports(&args.service, &ports));
    Ok(())
}
