//! # stv: stevedore CLI
//!
//! Brings compose projects up and down in dependency order and runs
//! commands inside their containers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use stevedore_runtime::interrupt::InterruptForwarder;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

const DEFAULT_LOG_FILTER: &str =
    "warn,stv=info,stevedore_common=info,stevedore_compose=info,stevedore_runtime=info";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(err) = ctrlc::set_handler(|| InterruptForwarder::global().interrupt()) {
        tracing::warn!(error = %err, "could not install interrupt handler");
    }

    match commands::execute(cli) {
        Ok(code) => code,
        Err(err) => {
            output::error(&err);
            exit_code(commands::exit_code_of(&err))
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
