//! Root switch via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root is moved aside and detached, so nothing
//! from the host's tree stays reachable from inside the container.

use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};

use corral_common::constants::CGROUP_V2_PATH;
use corral_common::error::{CorralError, Result};

/// Name of the directory, relative to the new root, that receives the old root.
pub const OLD_ROOT_DIR: &str = "old_root";

/// Moves the current root to `<new_root>/old_root` and makes `new_root` `/`.
///
/// # Errors
///
/// Returns an error if the put-old directory cannot be created or
/// `pivot_root(2)` fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(OLD_ROOT_DIR);
    std::fs::DirBuilder::new()
        .mode(0o700)
        .create(&put_old)
        .map_err(|e| CorralError::Io {
            path: put_old.clone(),
            source: e,
        })?;
    nix::unistd::pivot_root(new_root, &put_old)
        .map_err(|e| CorralError::syscall("pivot_root", new_root.display(), e))?;
    tracing::info!(new_root = %new_root.display(), "pivot_root complete");
    Ok(())
}

/// Lazily detaches and removes `/old_root`.
///
/// Failures are logged and otherwise ignored.
pub fn detach_old_root() {
    let old_root = Path::new("/").join(OLD_ROOT_DIR);
    if let Err(e) = umount2(&old_root, MntFlags::MNT_DETACH) {
        tracing::warn!(error = %e, "could not detach old root");
    }
    if let Err(e) = std::fs::remove_dir(&old_root) {
        tracing::warn!(error = %e, "could not remove old root mount point");
    }
}

/// Final touches on the new root: `/dev/ptmx`, `/tmp`, the cgroup view,
/// and the working directory.
///
/// # Errors
///
/// Returns an error if any of the steps fails.
pub fn finish_root() -> Result<()> {
    let ptmx = Path::new("/dev/ptmx");
    std::os::unix::fs::symlink("/dev/pts/ptmx", ptmx)
        .map_err(|e| CorralError::Io {
            path: ptmx.to_path_buf(),
            source: e,
        })?;

    mount_at(
        "tmpfs",
        Path::new("/tmp"),
        "tmpfs",
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        "mount-tmp",
    )?;
    mount_at(
        "cgroup2",
        Path::new(CGROUP_V2_PATH),
        "cgroup2",
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
        "mount-cgroup2",
    )?;

    nix::unistd::chdir("/").map_err(|e| CorralError::syscall("chdir", "/", e))?;
    Ok(())
}

fn mount_at(
    source: &str,
    target: &Path,
    fstype: &str,
    flags: MsFlags,
    operation: &'static str,
) -> Result<()> {
    if !target.is_dir() {
        std::fs::create_dir_all(target).map_err(|e| CorralError::Io {
            path: target.to_path_buf(),
            source: e,
        })?;
    }
    mount(Some(source), target, Some(fstype), flags, None::<&str>)
        .map_err(|e| CorralError::syscall(operation, target.display(), e))
}
