//! Privilege hardening applied before the container process is created.

use corral_common::error::{CorralError, Result};

/// Sets `PR_SET_NO_NEW_PRIVS` on the calling process.
///
/// The flag is inherited across `clone` and preserved across `execve`, so
/// neither the runtime nor anything it spawns can gain privileges through
/// set-user-ID binaries or file capabilities.
///
/// # Errors
///
/// Returns an error if `prctl(2)` fails.
pub fn set_no_new_privs() -> Result<()> {
    nix::sys::prctl::set_no_new_privs()
        .map_err(|e| CorralError::syscall("prctl-no_new_privs", "self", e))?;
    tracing::debug!("no_new_privs set");
    Ok(())
}

/// Reports whether `no_new_privs` is set on the calling process.
///
/// # Errors
///
/// Returns an error if `prctl(2)` fails.
pub fn no_new_privs() -> Result<bool> {
    nix::sys::prctl::get_no_new_privs()
        .map_err(|e| CorralError::syscall("prctl-get_no_new_privs", "self", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_new_privs_is_sticky() {
        set_no_new_privs().unwrap();
        assert!(no_new_privs().unwrap());
        set_no_new_privs().unwrap();
        assert!(no_new_privs().unwrap());
    }
}
