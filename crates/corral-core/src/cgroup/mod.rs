//! Cgroups v2 resource management.
//!
//! Each container gets one directory, `<cgroup_base>/<id>`, holding its
//! limit files and `cgroup.procs`. The directory is created and limited
//! before the container process exists, so the process can be born inside
//! it (see [`crate::namespace::spawn_isolated`]).

pub mod cpu;
pub mod limits;
pub mod memory;

use std::collections::BTreeSet;
use std::fs::File;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use corral_common::constants::{CGROUP_PROCS_FILE, PATH_LEN_MAX};
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ResourceLimit};

/// Handle to a cgroup for a specific container.
#[derive(Debug)]
pub struct CgroupManager {
    /// Path to this container's cgroup directory.
    path: PathBuf,
}

impl CgroupManager {
    /// Returns the cgroup path for `id` under `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting path exceeds `PATH_MAX`.
    pub fn path_for(base: &Path, id: &ContainerId) -> Result<PathBuf> {
        let path = base.join(id.as_str());
        if path.as_os_str().len() >= PATH_LEN_MAX {
            return Err(CorralError::config(format!(
                "cgroup path too long: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Creates the cgroup directory for the given container ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory already exists or cannot be created.
    pub fn create(base: &Path, id: &ContainerId) -> Result<Self> {
        let path = Self::path_for(base, id)?;
        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .map_err(|e| CorralError::Io {
                path: path.clone(),
                source: e,
            })?;
        tracing::info!(path = %path.display(), "cgroup created");
        Ok(Self { path })
    }

    /// Path to this cgroup's directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the cgroup directory for use with `CLONE_INTO_CGROUP`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened.
    pub fn open_dir(&self) -> Result<File> {
        File::open(&self.path).map_err(|e| CorralError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Enables, in the parent's `cgroup.subtree_control`, every controller
    /// named by `limits` that is not yet enabled.
    ///
    /// Best effort: failures are logged, and a limit whose controller is
    /// unavailable fails later when its interface file cannot be opened.
    pub fn ensure_controllers(&self, limits: &[ResourceLimit]) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let control = parent.join("cgroup.subtree_control");
        let enabled = std::fs::read_to_string(&control).unwrap_or_default();
        let enabled: BTreeSet<&str> = enabled.split_whitespace().collect();
        let wanted: BTreeSet<&str> = limits
            .iter()
            .map(ResourceLimit::controller)
            .filter(|c| !enabled.contains(c))
            .collect();
        for controller in wanted {
            if let Err(e) = std::fs::write(&control, format!("+{controller}")) {
                tracing::warn!(
                    controller,
                    file = %control.display(),
                    error = %e,
                    "could not enable cgroup controller"
                );
            } else {
                tracing::debug!(controller, "cgroup controller enabled");
            }
        }
    }

    /// Applies resource limits to this cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if any key is invalid (before anything is written)
    /// or if an interface file rejects its value.
    pub fn apply_limits(&self, limits: &[ResourceLimit]) -> Result<()> {
        limits::write_limits(&self.path, limits)?;
        if !limits.is_empty() {
            tracing::info!(count = limits.len(), "cgroup limits applied");
        }
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// Only needed when the process could not be placed here at creation.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: Pid) -> Result<()> {
        let procs_path = self.path.join(CGROUP_PROCS_FILE);
        std::fs::OpenOptions::new()
            .write(true)
            .open(&procs_path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, pid.as_raw().to_string().as_bytes()))
            .map_err(|e| CorralError::Io {
                path: procs_path,
                source: e,
            })?;
        tracing::debug!(pid = pid.as_raw(), "added process to cgroup");
        Ok(())
    }

    /// Removes the cgroup directory.
    ///
    /// The kernel refuses while member processes remain, so this is only
    /// valid after the container process has been reaped. A missing
    /// directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn destroy(&self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        }
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }
}
