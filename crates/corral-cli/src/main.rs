//! # corral
//!
//! Daemon-less, single-shot container runner: one image, one command,
//! fresh namespaces, cgroup limits, and an overlay root.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod logging;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_config());

    match commands::run::execute(cli) {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
