//! Mount utilities for the container's filesystem tree.
//!
//! Handles the pseudo-filesystems (`/proc`, `/dev`, `/dev/pts`, `/dev/shm`,
//! `/dev/mqueue`, `/sys`), device-node bind mounts, the resolver config,
//! and user-requested bind mounts. Everything here runs inside the child's
//! private mount namespace, before `pivot_root`.

use std::fs::{DirBuilder, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use nix::mount::{MsFlags, mount};
use nix::sys::statvfs::{FsFlags, statvfs};

use corral_common::constants::PATH_LEN_MAX;
use corral_common::error::{CorralError, Result};

/// Host device nodes exposed inside the container.
pub const DEVICE_NODES: [&str; 6] = ["null", "zero", "full", "tty", "random", "urandom"];

/// Host resolver configuration bound read-only into the container.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// A single mount: where from, where to, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host path (or filesystem source name).
    pub source: PathBuf,
    /// Path inside the container root.
    pub target: PathBuf,
    /// Filesystem type; `None` for bind mounts.
    pub fstype: Option<String>,
    /// Flags applied when the bind mount is remounted.
    pub flags: MsFlags,
    /// Filesystem-specific options.
    pub data: Option<String>,
}

impl MountSpec {
    /// A read-write bind mount of `source` at `target`.
    #[must_use]
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fstype: None,
            flags: MsFlags::empty(),
            data: None,
        }
    }

    /// Parses `source:target[:opts]`, where `opts` is a comma-separated
    /// list of `ro` and `rw`; the last one wins.
    ///
    /// `ro` sets exactly `MS_RDONLY`; `rw` or no option leaves the flags
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing part, a relative source,
    /// a target that escapes the root, or an unknown option.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.splitn(3, ':');
        let source = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default();
        if source.is_empty() || target.is_empty() {
            return Err(CorralError::config(format!(
                "bind mount must be SRC:DST[:ro|rw], got {spec:?}"
            )));
        }
        let source = PathBuf::from(source);
        if !source.is_absolute() {
            return Err(CorralError::config(format!(
                "bind mount source must be absolute: {}",
                source.display()
            )));
        }
        let target = PathBuf::from(target);
        if target.components().any(|c| c == Component::ParentDir) {
            return Err(CorralError::config(format!(
                "bind mount target may not contain '..': {}",
                target.display()
            )));
        }
        let mut flags = MsFlags::empty();
        for option in parts.next().map(|opts| opts.split(',')).into_iter().flatten() {
            match option {
                "ro" => flags.insert(MsFlags::MS_RDONLY),
                "rw" => flags.remove(MsFlags::MS_RDONLY),
                other => {
                    return Err(CorralError::config(format!(
                        "unknown bind mount option {other:?} (expected ro or rw)"
                    )));
                }
            }
        }
        Ok(Self {
            flags,
            ..Self::bind(source, target)
        })
    }

    /// Whether the mount ends up read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.flags.contains(MsFlags::MS_RDONLY)
    }

    /// Resolves the target against a container root.
    #[must_use]
    pub fn target_in(&self, root: &Path) -> PathBuf {
        let relative: PathBuf = self
            .target
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        root.join(relative)
    }
}

impl FromStr for MountSpec {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Creates `target` when it is missing, mirroring the type and permission
/// bits of `source`. An existing target is left untouched.
///
/// Returns `true` when something was created.
///
/// # Errors
///
/// Returns an error if `source` cannot be inspected or `target` cannot be
/// created.
pub fn prepare_mount_target(source: &Path, target: &Path) -> Result<bool> {
    if target.exists() {
        return Ok(false);
    }
    let meta = std::fs::metadata(source).map_err(|e| CorralError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let mode = meta.permissions().mode() & 0o7777;
    let created = if meta.is_dir() {
        DirBuilder::new().mode(mode).create(target)
    } else {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(target)
            .map(drop)
    };
    created
        .and_then(|()| std::fs::set_permissions(target, Permissions::from_mode(mode)))
        .map_err(|e| CorralError::Io {
            path: target.to_path_buf(),
            source: e,
        })?;
    tracing::debug!(target = %target.display(), mode = format_args!("{mode:o}"), "created mount point");
    Ok(true)
}

/// Bind-mounts `source` onto `target`, then remounts with `flags`.
///
/// Flags the kernel locks on the source mount (`nosuid`, `nodev`, `noexec`,
/// atime) are carried into the remount, which would otherwise be refused
/// inside a user namespace.
///
/// # Errors
///
/// Returns an error if either mount call fails.
pub fn bind_mount(source: &Path, target: &Path, flags: MsFlags) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("bindmount", target.display(), e))?;

    let remount = MsFlags::MS_REMOUNT | MsFlags::MS_BIND | flags | locked_flags(target);
    mount(None::<&str>, target, None::<&str>, remount, None::<&str>)
        .map_err(|e| CorralError::syscall("remount-bind", target.display(), e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        read_only = flags.contains(MsFlags::MS_RDONLY),
        "bind mount applied"
    );
    Ok(())
}

fn locked_flags(target: &Path) -> MsFlags {
    let Ok(stat) = statvfs(target) else {
        return MsFlags::empty();
    };
    let have = stat.flags();
    [
        (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
        (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
        (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
        (FsFlags::ST_NOATIME, MsFlags::MS_NOATIME),
        (FsFlags::ST_NODIRATIME, MsFlags::MS_NODIRATIME),
        (FsFlags::ST_RELATIME, MsFlags::MS_RELATIME),
    ]
    .into_iter()
    .filter(|(st, _)| have.contains(*st))
    .fold(MsFlags::empty(), |acc, (_, ms)| acc | ms)
}

/// Applies one user bind mount under `root`, creating its target if needed.
///
/// # Errors
///
/// Returns an error if the target path is too long, resolves outside
/// `root` through a symlink, cannot be created, or the mount fails.
pub fn apply_bind_mount(root: &Path, spec: &MountSpec) -> Result<()> {
    let target = spec.target_in(root);
    check_path_len(&target)?;
    confine_to_root(root, &target)?;
    let _ = prepare_mount_target(&spec.source, &target)?;
    bind_mount(&spec.source, &target, spec.flags)
}

/// Fails when the deepest existing ancestor of `target` resolves outside
/// `root`, as it does when the image holds an absolute symlink on the path.
fn confine_to_root(root: &Path, target: &Path) -> Result<()> {
    let canonical = |path: &Path| {
        path.canonicalize().map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    };
    let root = canonical(root)?;
    let Some(existing) = target.ancestors().find(|p| p.exists()) else {
        return Ok(());
    };
    let resolved = canonical(existing)?;
    if !resolved.starts_with(&root) {
        return Err(CorralError::config(format!(
            "bind mount target {} resolves outside the container root to {}",
            target.display(),
            resolved.display()
        )));
    }
    Ok(())
}

/// Mounts the pseudo-filesystems and device nodes under `root`.
///
/// Order matters: `/dev` is a fresh tmpfs, so its children are created and
/// mounted after it.
///
/// # Errors
///
/// Returns an error on the first mount that fails.
pub fn mount_essential_filesystems(root: &Path) -> Result<()> {
    let proc_dir = ensure_dir(&root.join("proc"))?;
    mount(
        Some("proc"),
        &proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("mount-proc", proc_dir.display(), e))?;

    let dev = ensure_dir(&root.join("dev"))?;
    mount(
        Some("tmpfs"),
        &dev,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=0755,size=65536k"),
    )
    .map_err(|e| CorralError::syscall("mount-dev", dev.display(), e))?;

    let pts = ensure_dir(&dev.join("pts"))?;
    mount(
        Some("devpts"),
        &pts,
        Some("devpts"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=620"),
    )
    .map_err(|e| CorralError::syscall("mount-devpts", pts.display(), e))?;

    let shm = ensure_dir(&dev.join("shm"))?;
    mount(
        Some("shm"),
        &shm,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        Some("mode=1777,size=65536k"),
    )
    .map_err(|e| CorralError::syscall("mount-shm", shm.display(), e))?;

    let mqueue = ensure_dir(&dev.join("mqueue"))?;
    mount(
        Some("mqueue"),
        &mqueue,
        Some("mqueue"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("mount-mqueue", mqueue.display(), e))?;

    let sys = ensure_dir(&root.join("sys"))?;
    mount(
        Some("sysfs"),
        &sys,
        Some("sysfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("mount-sysfs", sys.display(), e))?;

    mount_device_nodes(&dev)?;
    mount_resolv_conf(root)?;
    tracing::info!(root = %root.display(), "essential filesystems mounted");
    Ok(())
}

fn mount_device_nodes(dev: &Path) -> Result<()> {
    for name in DEVICE_NODES {
        let host = Path::new("/dev").join(name);
        let node = dev.join(name);
        let _ = prepare_mount_target(&host, &node)?;
        mount(
            Some(host.as_path()),
            &node,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| CorralError::syscall("bindmount-device", node.display(), e))?;
    }
    Ok(())
}

fn mount_resolv_conf(root: &Path) -> Result<()> {
    let host = Path::new(RESOLV_CONF);
    let target = root.join("etc").join("resolv.conf");
    if let Some(etc) = target.parent() {
        let _ = ensure_dir(etc)?;
    }
    let _ = prepare_mount_target(host, &target)?;
    bind_mount(host, &target, MsFlags::MS_RDONLY)
}

/// Marks the whole mount tree private so nothing propagates to the host.
///
/// # Errors
///
/// Returns an error if the propagation change is refused.
pub fn make_rprivate() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("make-rprivate", "/", e))
}

pub(crate) fn check_path_len(path: &Path) -> Result<()> {
    if path.as_os_str().len() >= PATH_LEN_MAX {
        return Err(CorralError::config(format!(
            "path too long: {}",
            path.display()
        )));
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<PathBuf> {
    check_path_len(path)?;
    if !path.is_dir() {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
            .map_err(|e| CorralError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
    }
    Ok(path.to_path_buf())
}
