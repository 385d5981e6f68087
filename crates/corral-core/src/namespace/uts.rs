//! UTS namespace hostname.

use corral_common::error::{CorralError, Result};
use corral_common::types::validate_hostname;

/// Sets the hostname inside the calling process's UTS namespace.
///
/// # Errors
///
/// Returns an error if no hostname is configured, if it is malformed, or
/// if `sethostname(2)` fails.
pub fn setup_hostname(hostname: Option<&str>) -> Result<()> {
    let hostname = hostname.ok_or_else(|| CorralError::config("hostname is not set"))?;
    validate_hostname(hostname)?;
    nix::unistd::sethostname(hostname)
        .map_err(|e| CorralError::syscall("sethostname", hostname, e))?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
