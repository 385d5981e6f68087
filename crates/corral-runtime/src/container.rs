//! Container lifecycle: spawn, confine, wait, tear down.

use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ExitOutcome};
use corral_core::cgroup::CgroupManager;
use corral_core::namespace::{NamespaceSet, spawn_isolated};
use corral_core::privilege;

use crate::confine::{HostNetwork, KernelConfinement, confine_then_release};
use crate::config::ContainerConfig;
use crate::handshake;
use crate::process::{self, ChildPlan};

/// Shared handle to the running container process, for signal forwarding.
///
/// Holds `0` while no process is running.
#[derive(Debug, Clone, Default)]
pub struct ChildHandle(Arc<AtomicI32>);

impl ChildHandle {
    /// PID of the running container process, if any.
    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    /// Sends `SIGKILL` to the container process, if one is running.
    pub fn kill(&self) {
        if let Some(pid) = self.pid() {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                tracing::warn!(pid = pid.as_raw(), error = %e, "could not kill container");
            }
        }
    }

    fn set(&self, pid: Option<Pid>) {
        self.0.store(pid.map_or(0, Pid::as_raw), Ordering::SeqCst);
    }
}

/// A container ready to run: configuration validated and ID assigned.
#[derive(Debug)]
pub struct Container {
    config: ContainerConfig,
    handle: ChildHandle,
}

impl Container {
    /// Validates `config` and assigns a fresh ID.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation fails.
    pub fn new(mut config: ContainerConfig) -> Result<Self> {
        config.validate()?;
        let id = ContainerId::generate(config.hostname.as_deref())?;
        config.assign_id(id)?;
        Ok(Self {
            config,
            handle: ChildHandle::default(),
        })
    }

    /// The container's ID.
    ///
    /// # Errors
    ///
    /// Never fails for a constructed container.
    pub fn id(&self) -> Result<&ContainerId> {
        self.config.id()
    }

    /// The container's configuration.
    #[must_use]
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Handle for forwarding signals to the container process.
    #[must_use]
    pub fn handle(&self) -> ChildHandle {
        self.handle.clone()
    }

    /// Runs the command to completion and reports how it ended.
    ///
    /// With `remove_on_exit`, the cgroup and container data are removed
    /// afterwards; failures there are logged only.
    ///
    /// # Errors
    ///
    /// Returns an error if any setup step before the child is released
    /// fails. In that case the child is killed and everything created so
    /// far is removed.
    pub fn run(&self) -> Result<ExitOutcome> {
        self.run_with(|_| ())
    }

    /// Like [`Container::run`], calling `after_spawn` with the process
    /// handle once the child exists.
    ///
    /// Work that starts threads, such as installing a signal forwarder,
    /// belongs here: the child is cloned from a single-threaded parent.
    ///
    /// # Errors
    ///
    /// As [`Container::run`].
    pub fn run_with<F>(&self, after_spawn: F) -> Result<ExitOutcome>
    where
        F: FnOnce(&ChildHandle),
    {
        let id = self.config.id()?;
        tracing::info!(%id, image = %self.config.image, "starting container");

        let host_network = HostNetwork::resolve(&self.config, id)?;
        let plan = ChildPlan::new(&self.config)?;
        if !plan.rootfs.image_rootfs.is_dir() {
            return Err(CorralError::config(format!(
                "image rootfs not found: {}",
                plan.rootfs.image_rootfs.display()
            )));
        }

        let (mut parent_end, child_end) = handshake::channel()?;
        privilege::set_no_new_privs()?;

        let cgroup = CgroupManager::create(&self.config.paths.cgroup_base, id)?;
        cgroup.ensure_controllers(&self.config.limits);
        let cgroup_dir = match cgroup
            .apply_limits(&self.config.limits)
            .and_then(|()| cgroup.open_dir())
        {
            Ok(dir) => dir,
            Err(e) => {
                self.teardown(&cgroup, &plan);
                return Err(e);
            }
        };

        let parent_fd = parent_end.as_raw_fd();
        let mut child_end = Some(child_end);
        let child_plan = &plan;
        let spawned = spawn_isolated(
            NamespaceSet::container(),
            Some(cgroup_dir.as_fd()),
            move || {
                // SAFETY: this is the child's inherited copy of the parent's
                // end; nothing else in this process uses it.
                drop(unsafe { OwnedFd::from_raw_fd(parent_fd) });
                match child_end.take() {
                    Some(gate) => process::run_child(child_plan, gate),
                    None => process::SETUP_FAILURE_CODE,
                }
            },
        );
        drop(cgroup_dir);
        let spawned = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                self.teardown(&cgroup, &plan);
                return Err(e);
            }
        };
        self.handle.set(Some(spawned.pid));
        after_spawn(&self.handle);

        let mut host = KernelConfinement::new(&cgroup, host_network.as_ref());
        if let Err(e) = confine_then_release(spawned, &mut host, &mut parent_end) {
            tracing::error!(error = %e, "confinement failed, killing container");
            drop(parent_end);
            self.handle.kill();
            if let Err(wait_err) = wait_for(spawned.pid) {
                tracing::warn!(error = %wait_err, "could not reap container");
            }
            self.handle.set(None);
            self.teardown(&cgroup, &plan);
            return Err(e);
        }
        drop(parent_end);

        let outcome = wait_for(spawned.pid);
        self.handle.set(None);
        let outcome = outcome?;
        match outcome {
            ExitOutcome::Exited(code) => tracing::info!(%id, code, "container exited"),
            ExitOutcome::Signaled(signo) => tracing::warn!(%id, signo, "container killed by signal"),
        }

        if self.config.remove_on_exit {
            self.teardown(&cgroup, &plan);
        }
        Ok(outcome)
    }

    fn teardown(&self, cgroup: &CgroupManager, plan: &ChildPlan) {
        if let Err(e) = cgroup.destroy() {
            tracing::warn!(error = %e, "cgroup cleanup failed");
        }
        if let Err(e) = plan.rootfs.layout.remove() {
            tracing::warn!(error = %e, "container data cleanup failed");
        }
        tracing::debug!(id = ?self.config.id().ok(), "teardown finished");
    }
}

/// Blocks until `pid` terminates.
///
/// # Errors
///
/// Returns an error if `waitpid` fails for a reason other than `EINTR`.
pub fn wait_for(pid: Pid) -> Result<ExitOutcome> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitOutcome::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitOutcome::Signaled(signal as i32));
            }
            Ok(status) => tracing::debug!(?status, "ignoring wait status"),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(CorralError::syscall("waitpid", pid, e)),
        }
    }
}
