//! Network namespace setup.
//!
//! Inside the container only loopback is configured. External connectivity
//! (a veth pair attached to a host bridge) is delegated to a host-side
//! collaborator command, called with four positional arguments:
//! `<short_id> <child_pid> <ip> <gateway>`, with the bridge name in
//! `CORRAL_BRIDGE`. Only its exit status is observed.

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
use nix::unistd::Pid;

use corral_common::error::{CorralError, Result};

const LOOPBACK: &[u8] = b"lo";

/// Environment variable carrying the bridge name to the collaborator.
pub const BRIDGE_ENV: &str = "CORRAL_BRIDGE";

/// Static addressing for the container's veth interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAddress {
    /// Address assigned inside the container, optionally with a prefix length.
    pub ip: String,
    /// Default gateway inside the container.
    pub gateway: String,
}

/// Brings the loopback interface up in the caller's network namespace.
///
/// # Errors
///
/// Returns an error if the control socket cannot be opened or either
/// interface-flag `ioctl` fails.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn setup_container_side() -> Result<()> {
    let sock = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| CorralError::syscall("socket", "lo", e))?;

    // SAFETY: `ifreq` is plain old data; all-zero is a valid value.
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(LOOPBACK) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: `sock` is an open socket and `req` a valid, NUL-terminated ifreq.
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS, &raw mut req) } < 0 {
        return Err(CorralError::syscall("ioctl-SIOCGIFFLAGS", "lo", Errno::last()));
    }
    // SAFETY: SIOCGIFFLAGS filled the `ifru_flags` member of the union.
    unsafe {
        req.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    }
    // SAFETY: as above; the kernel only reads `req`.
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS, &raw const req) } < 0 {
        return Err(CorralError::syscall("ioctl-SIOCSIFFLAGS", "lo", Errno::last()));
    }
    tracing::debug!("loopback up");
    Ok(())
}

/// Locates the host-side provisioning collaborator.
///
/// Paths containing a `/` are used as given; bare names are looked up on
/// `PATH`.
///
/// # Errors
///
/// Returns a configuration error if the collaborator cannot be found.
pub fn resolve_collaborator(script: &Path) -> Result<PathBuf> {
    if script.components().count() > 1 || script.is_absolute() {
        if script.is_file() {
            return Ok(script.to_path_buf());
        }
        return Err(CorralError::config(format!(
            "network collaborator not found: {}",
            script.display()
        )));
    }
    which::which(script).map_err(|e| {
        CorralError::config(format!(
            "network collaborator {} not on PATH: {e}",
            script.display()
        ))
    })
}

/// Runs the collaborator that wires a veth pair into the child's namespace.
///
/// # Errors
///
/// Returns an error if the collaborator cannot be started or exits
/// unsuccessfully.
pub fn setup_host_side(
    script: &Path,
    bridge: &str,
    short_id: &str,
    child: Pid,
    address: &StaticAddress,
) -> Result<()> {
    let pid = child.as_raw().to_string();
    tracing::debug!(
        script = %script.display(),
        short_id,
        pid = %pid,
        ip = %address.ip,
        gateway = %address.gateway,
        "running network collaborator"
    );
    run(Command::new(script)
        .env(BRIDGE_ENV, bridge)
        .args([
            short_id,
            pid.as_str(),
            address.ip.as_str(),
            address.gateway.as_str(),
        ]))?;
    tracing::info!(short_id, ip = %address.ip, "container network wired");
    Ok(())
}

/// Ensures the shared host bridge exists and is up.
///
/// Idempotent: the bridge is only created when `ip link show` cannot find it.
///
/// # Errors
///
/// Returns an error if `ip` cannot be run or bridge creation fails.
pub fn setup_host_bridge(bridge: &str) -> Result<()> {
    let exists = Command::new("ip")
        .args(["link", "show", bridge])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| CorralError::Io {
            path: "ip".into(),
            source: e,
        })?
        .success();
    if exists {
        tracing::debug!(bridge, "host bridge already present");
    } else {
        tracing::info!(bridge, "creating host bridge");
        run(Command::new("ip").args(["link", "add", "name", bridge, "type", "bridge"]))?;
    }
    run(Command::new("ip").args(["link", "set", bridge, "up"]))
}

fn run(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command.status().map_err(|e| CorralError::Io {
        path: PathBuf::from(&program),
        source: e,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(CorralError::Collaborator {
            command: program,
            status: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn collaborator_receives_four_positional_args_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args");
        let ok = script(
            dir.path(),
            "ok.sh",
            &format!("echo \"$@ $CORRAL_BRIDGE\" > {}", out.display()),
        );
        let failing = script(dir.path(), "fail.sh", "exit 3");
        let address = StaticAddress {
            ip: "10.10.0.2/24".into(),
            gateway: "10.10.0.1".into(),
        };

        setup_host_side(&ok, "br0", "ab12c", Pid::from_raw(4321), &address).unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap().trim(),
            "ab12c 4321 10.10.0.2/24 10.10.0.1 br0"
        );

        let err =
            setup_host_side(&failing, "br0", "ab12c", Pid::from_raw(4321), &address).unwrap_err();
        assert!(matches!(err, CorralError::Collaborator { .. }));
    }

    #[test]
    fn resolve_collaborator_checks_explicit_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = script(dir.path(), "veth.sh", "exit 0");
        assert_eq!(resolve_collaborator(&present).unwrap(), present);
        assert!(resolve_collaborator(&dir.path().join("absent.sh")).is_err());
    }

    #[test]
    fn resolve_collaborator_searches_path_for_bare_names() {
        assert!(resolve_collaborator(Path::new("sh")).is_ok());
        assert!(resolve_collaborator(Path::new("corral-no-such-collaborator")).is_err());
    }
}
