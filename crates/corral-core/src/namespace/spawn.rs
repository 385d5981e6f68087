//! Process creation inside fresh namespaces.
//!
//! The preferred path is `clone3(2)` with `CLONE_INTO_CGROUP`, which makes
//! cgroup membership part of process creation. Kernels without `clone3` or
//! without cgroup placement fall back to `clone(2)` on a private stack, and
//! the caller must admit the child into its cgroup before doing anything
//! else.

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::unistd::{ForkResult, Pid};

use corral_common::error::{CorralError, Result};

use super::NamespaceSet;

/// `clone3` flag placing the child in the cgroup referred to by `cgroup`.
const CLONE_INTO_CGROUP: u64 = 0x2_0000_0000;

/// Stack size for the `clone(2)` fallback.
const FALLBACK_STACK_SIZE: usize = 1024 * 1024;

/// `struct clone_args` as of Linux 5.7 (`CLONE_ARGS_SIZE_VER2`).
#[repr(C)]
#[derive(Debug, Default)]
struct CloneArgs {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

/// Where the new process stands with respect to its cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupPlacement {
    /// The kernel placed the child in the cgroup as part of `clone3`.
    AtClone,
    /// The child runs in the caller's cgroup and must be admitted explicitly.
    Pending,
}

/// A freshly created container process, seen from the parent.
#[derive(Debug, Clone, Copy)]
pub struct Spawned {
    /// PID of the child in the caller's PID namespace.
    pub pid: Pid,
    /// Whether cgroup admission still has to happen.
    pub placement: CgroupPlacement,
}

/// Creates a child process in every namespace of `namespaces`.
///
/// `child` runs in the new process; its return value becomes the exit
/// status. It is expected to end in `execve` on success. When `cgroup_dir`
/// is given, placement into that cgroup is attempted atomically; on kernels
/// that cannot do so the returned placement is [`CgroupPlacement::Pending`].
///
/// # Errors
///
/// Returns an error if the namespace set is incomplete or if the kernel
/// refuses to create the process.
pub fn spawn_isolated<F>(
    namespaces: NamespaceSet,
    cgroup_dir: Option<BorrowedFd<'_>>,
    mut child: F,
) -> Result<Spawned>
where
    F: FnMut() -> i32,
{
    namespaces.require_complete()?;
    let flags = namespaces.clone_flags();

    if let Some(dir) = cgroup_dir {
        match clone_into_cgroup(flags, dir) {
            Ok(ForkResult::Child) => {
                // Only the calling thread exists in the child and no atfork
                // handlers have run. Callers clone before starting helper
                // threads so no lock is left held by a thread that is gone.
                let code = child();
                // SAFETY: `_exit` never returns and skips the parent's atexit
                // handlers, which this copy of the address space must not run.
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child: pid }) => {
                tracing::info!(pid = pid.as_raw(), "spawned container process into cgroup");
                return Ok(Spawned {
                    pid,
                    placement: CgroupPlacement::AtClone,
                });
            }
            Err(errno @ (Errno::ENOSYS | Errno::E2BIG | Errno::EINVAL)) => {
                tracing::warn!(%errno, "clone3 into cgroup unsupported, falling back to clone");
            }
            Err(errno) => {
                return Err(CorralError::syscall("clone3", "container process", errno));
            }
        }
    }

    let pid = clone_with_stack(flags, &mut child)?;
    tracing::info!(pid = pid.as_raw(), "spawned container process, cgroup admission pending");
    Ok(Spawned {
        pid,
        placement: CgroupPlacement::Pending,
    })
}

#[allow(clippy::cast_sign_loss)]
fn clone_into_cgroup(
    flags: CloneFlags,
    cgroup_dir: BorrowedFd<'_>,
) -> std::result::Result<ForkResult, Errno> {
    let mut args = CloneArgs {
        flags: u64::from(flags.bits() as u32) | CLONE_INTO_CGROUP,
        exit_signal: libc::SIGCHLD as u64,
        cgroup: cgroup_dir.as_raw_fd() as u64,
        ..CloneArgs::default()
    };
    // SAFETY: `args` is a valid `clone_args` of the advertised size and
    // outlives the call. Without CLONE_VM the child receives a private copy
    // of the address space and resumes here with a return value of 0.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone3,
            &raw mut args,
            std::mem::size_of::<CloneArgs>(),
        )
    };
    match ret {
        -1 => Err(Errno::last()),
        0 => Ok(ForkResult::Child),
        pid => Ok(ForkResult::Parent {
            child: Pid::from_raw(libc::pid_t::try_from(pid).map_err(|_| Errno::EOVERFLOW)?),
        }),
    }
}

fn clone_with_stack(flags: CloneFlags, child: &mut dyn FnMut() -> i32) -> Result<Pid> {
    let mut stack = vec![0_u8; FALLBACK_STACK_SIZE];
    let callback: nix::sched::CloneCb<'_> = Box::new(|| isize::try_from(child()).unwrap_or(1));
    // SAFETY: without CLONE_VM the child runs on its own copy of `stack` and
    // of everything the callback borrows, and exits when the callback returns.
    unsafe { nix::sched::clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| CorralError::syscall("clone", "container process", e))
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::fd::AsFd;
    use std::path::PathBuf;

    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::{WaitStatus, waitpid};

    use corral_common::constants::CGROUP_V2_PATH;

    use super::*;

    /// A fresh cgroup below the test process's own, or `None` when the
    /// unified hierarchy is not writable here.
    fn scratch_cgroup() -> Option<PathBuf> {
        let own = std::fs::read_to_string("/proc/self/cgroup").ok()?;
        let relative = own.lines().find_map(|line| line.strip_prefix("0::"))?;
        let dir = PathBuf::from(CGROUP_V2_PATH)
            .join(relative.trim_start_matches('/'))
            .join(format!("corral-spawn-{}", std::process::id()));
        std::fs::create_dir(&dir).ok()?;
        Some(dir)
    }

    #[test]
    fn clone_args_matches_kernel_ver2_size() {
        assert_eq!(std::mem::size_of::<CloneArgs>(), 88);
    }

    #[test]
    fn incomplete_namespace_set_never_clones() {
        let set = NamespaceSet {
            user: false,
            ..NamespaceSet::container()
        };
        let mut ran = false;
        let result = spawn_isolated(set, None, || {
            ran = true;
            0
        });
        assert!(result.unwrap_err().is_config());
        assert!(!ran);
    }

    #[test]
    fn fallback_clone_runs_child_in_namespaces() {
        let spawned = spawn_isolated(NamespaceSet::container(), None, || 5).unwrap();
        assert_eq!(spawned.placement, CgroupPlacement::Pending);
        assert_eq!(
            waitpid(spawned.pid, None).unwrap(),
            WaitStatus::Exited(spawned.pid, 5)
        );
    }

    #[test]
    fn clone3_places_child_in_cgroup() {
        let Some(cgroup) = scratch_cgroup() else {
            return;
        };
        let dir = File::open(&cgroup).unwrap();
        let spawned = spawn_isolated(NamespaceSet::container(), Some(dir.as_fd()), || -> i32 {
            loop {
                // SAFETY: pause is async-signal-safe.
                unsafe { libc::pause() };
            }
        })
        .unwrap();

        let procs = std::fs::read_to_string(cgroup.join("cgroup.procs")).unwrap();
        kill(spawned.pid, Signal::SIGKILL).unwrap();
        let _ = waitpid(spawned.pid, None).unwrap();
        std::fs::remove_dir(&cgroup).unwrap();

        assert_eq!(spawned.placement, CgroupPlacement::AtClone);
        assert!(
            procs.lines().any(|pid| pid == spawned.pid.to_string()),
            "{} not in {procs:?}",
            spawned.pid
        );
    }
}
