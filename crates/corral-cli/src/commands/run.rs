//! Runs the container described by the command line.

use anyhow::Context;

use corral_common::types::ExitOutcome;
use corral_runtime::{ChildHandle, Container};

use super::Cli;

/// Builds the container, runs it, and forwards Ctrl+C as `SIGKILL` once
/// the process exists.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or setup fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitOutcome> {
    let config = cli.into_config().context("invalid resource limits")?;
    let container = Container::new(config).context("invalid container configuration")?;
    let id = container.id()?.clone();
    tracing::debug!(%id, short_id = id.short(), "container configured");

    // The command runs as PID 1 of its namespace and ignores SIGINT unless
    // it installs a handler, so interrupts are escalated. The handler thread
    // is started only once the child has been cloned.
    let outcome = container
        .run_with(forward_interrupts)
        .with_context(|| format!("container {} failed", id.short()))?;
    if !outcome.success() {
        tracing::debug!(%id, code = outcome.exit_code(), "command did not succeed");
    }
    Ok(outcome)
}

fn forward_interrupts(handle: &ChildHandle) {
    let handle = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || handle.kill()) {
        tracing::warn!(error = %e, "could not forward Ctrl+C to the container");
    }
}
