//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: spawning a child into fresh mount, PID, network, UTS,
//!   IPC, cgroup, and user namespaces, plus UID/GID mapping and hostname.
//! - **Cgroups v2**: per-container cgroup creation, limit writes, and
//!   atomic placement via `CLONE_INTO_CGROUP`.
//! - **Filesystem**: `OverlayFS` composition, the pseudo-filesystem tree,
//!   user bind mounts, and `pivot_root`.
//! - **Privilege**: `no_new_privs` hardening.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod privilege;
