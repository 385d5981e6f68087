//! Linux namespace management for container isolation.
//!
//! The container is never moved into namespaces after the fact: every
//! namespace is requested in the same `clone` that creates the process, so
//! the child is isolated from its first instruction.

pub mod network;
pub mod spawn;
pub mod user;
pub mod uts;

use nix::sched::CloneFlags;

use corral_common::error::{CorralError, Result};

pub use spawn::{CgroupPlacement, Spawned, spawn_isolated};

/// Which namespaces the container process is created in.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Private mount table.
    pub mount: bool,
    /// Private PID space; the command runs as PID 1.
    pub pid: bool,
    /// Private network stack.
    pub network: bool,
    /// Private hostname.
    pub uts: bool,
    /// Private System V IPC and POSIX message queues.
    pub ipc: bool,
    /// Private view of the cgroup hierarchy.
    pub cgroup: bool,
    /// Private UID/GID space.
    pub user: bool,
}

impl NamespaceSet {
    /// The full set every container is created with.
    #[must_use]
    pub const fn container() -> Self {
        Self {
            mount: true,
            pid: true,
            network: true,
            uts: true,
            ipc: true,
            cgroup: true,
            user: true,
        }
    }

    /// Translates the set into `clone(2)` flags.
    #[must_use]
    pub fn clone_flags(self) -> CloneFlags {
        [
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.cgroup, CloneFlags::CLONE_NEWCGROUP),
            (self.user, CloneFlags::CLONE_NEWUSER),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(CloneFlags::empty(), |acc, (_, flag)| acc | flag)
    }

    /// Fails unless every namespace is requested.
    ///
    /// A container missing any namespace is not a supported deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the missing namespaces.
    pub fn require_complete(self) -> Result<()> {
        let missing: Vec<&str> = [
            (self.mount, "mount"),
            (self.pid, "pid"),
            (self.network, "network"),
            (self.uts, "uts"),
            (self.ipc, "ipc"),
            (self.cgroup, "cgroup"),
            (self.user, "user"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| (!enabled).then_some(name))
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CorralError::config(format!(
                "container requires all namespaces, missing: {}",
                missing.join(", ")
            )))
        }
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::container()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_set_requests_seven_namespaces() {
        let flags = NamespaceSet::container().clone_flags();
        for flag in [
            CloneFlags::CLONE_NEWNS,
            CloneFlags::CLONE_NEWPID,
            CloneFlags::CLONE_NEWNET,
            CloneFlags::CLONE_NEWUTS,
            CloneFlags::CLONE_NEWIPC,
            CloneFlags::CLONE_NEWCGROUP,
            CloneFlags::CLONE_NEWUSER,
        ] {
            assert!(flags.contains(flag), "missing {flag:?}");
        }
    }

    #[test]
    fn partial_set_is_rejected() {
        let set = NamespaceSet {
            network: false,
            ..NamespaceSet::container()
        };
        let err = set.require_complete().unwrap_err();
        assert!(err.to_string().contains("network"));
        assert!(!set.clone_flags().contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn default_is_complete() {
        assert!(NamespaceSet::default().require_complete().is_ok());
    }
}
