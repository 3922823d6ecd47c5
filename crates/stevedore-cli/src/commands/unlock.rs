//! `stv unlock`: remove a project lock left behind by a dead process.

use clap::Args;
use stevedore_runtime::lock::ProjectLock;

use super::Context;
use crate::output;

/// Arguments for the `unlock` command.
#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Project whose lock should be removed.
    #[arg(long, required = true)]
    pub project: String,
}

/// Executes the `unlock` command.
///
/// # Errors
///
/// Returns an error if the lock is held by a live process or cannot be
/// removed.
pub fn execute(args: &UnlockArgs, ctx: &Context) -> anyhow::Result<()> {
    match ProjectLock::reclaim(&ctx.config.lock_dir, &args.project)? {
        Some(holder) => {
            output::print(&format!("unlocked {} (was held by {holder})\n", args.project));
        }
        None => output::print(&format!("{} is not locked\n", args.project)),
    }
    Ok(())
}
