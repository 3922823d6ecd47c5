//! `stv exec`: run a command inside a service container.

use std::process::ExitCode;

use clap::Args;
use stevedore_common::error::EXIT_COMMAND_FAILED;
use stevedore_runtime::backend::{ExecIo, ExecRequest};

use super::{Context, ProjectArgs, seconds};

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Project location and name.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Attach a TTY and this terminal's stdin.
    #[arg(short, long)]
    pub interactive: bool,

    /// Kill the command after this many seconds.
    #[arg(long, value_name = "SECS", conflicts_with = "interactive")]
    pub timeout: Option<u64>,

    /// Logical service name, e.g. `web`.
    pub service: String,

    /// Command and arguments to run.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// The command's own nonzero exit status is reported as
/// [`EXIT_COMMAND_FAILED`], not as an error.
///
/// # Errors
///
/// Returns an error if the project or service is unknown, the container is
/// not running, or the command could not be launched.
pub fn execute(args: ExecArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let name = args.project.project_name()?;
    let request = ExecRequest {
        argv: args.command,
        interactive: args.interactive,
        timeout: seconds(args.timeout),
    };
    let outcome = ctx
        .dispatcher()?
        .exec_with(&name, &args.service, request, ExecIo::inherit())?;

    if outcome.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::info!(
            project = %name,
            service = %args.service,
            code = outcome.code,
            "command exited nonzero"
        );
        Ok(ExitCode::from(u8::try_from(EXIT_COMMAND_FAILED).unwrap_or(3)))
    }
}
