//! The container process from the inside.
//!
//! Runs in the freshly cloned child: waits for the parent, builds the
//! container's view of the system, and replaces itself with the command.
//! Nothing here returns to the parent; the outcome is the exit status.

use std::ffi::{CStr, CString};
use std::io::Write;

use nix::errno::Errno;

use corral_common::constants::BIN_NAME;
use corral_common::error::{CorralError, Result};
use corral_core::filesystem::{self, RootfsPlan};
use corral_core::filesystem::overlayfs::OverlayLayout;
use corral_core::namespace::{network, uts};

use crate::config::ContainerConfig;
use crate::handshake::ChildEnd;

/// Exit status when setup fails before `exec`.
pub const SETUP_FAILURE_CODE: i32 = 1;

/// Exit status when `exec` itself fails, as in shells.
pub const EXEC_FAILURE_CODE: i32 = 127;

/// How far the child has come.
///
/// After a successful `exec` the process image is replaced, so there is
/// no stage for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStage {
    /// Waiting for the parent and composing the container.
    Setup,
    /// Environment applied; `execvp` attempted.
    ExecRequested,
}

impl ChildStage {
    /// Exit status reported when the child fails at this stage.
    #[must_use]
    pub const fn failure_code(self) -> i32 {
        match self {
            Self::Setup => SETUP_FAILURE_CODE,
            Self::ExecRequested => EXEC_FAILURE_CODE,
        }
    }
}

/// Child-side inputs, prepared in the parent before spawning.
#[derive(Debug, Clone)]
pub struct ChildPlan {
    /// Filesystem composition.
    pub rootfs: RootfsPlan,
    /// Hostname to set.
    pub hostname: Option<String>,
    /// Environment, applied in order after clearing.
    pub env: Vec<(String, String)>,
    /// `argv`, with `argv[0]` looked up on `PATH`.
    pub argv: Vec<CString>,
}

impl ChildPlan {
    /// Builds the plan from a configuration with an assigned ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is missing, paths are too long, or the
    /// command contains a NUL byte.
    pub fn new(config: &ContainerConfig) -> Result<Self> {
        let id = config.id()?;
        let argv = config
            .command
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes())
                    .map_err(|_| CorralError::config(format!("NUL byte in argument {arg:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if argv.is_empty() {
            return Err(CorralError::config("no command given"));
        }
        Ok(Self {
            rootfs: RootfsPlan {
                image_rootfs: config.image_rootfs(),
                layout: OverlayLayout::new(&config.paths.container_base, id)?,
                mounts: config.mounts.clone(),
            },
            hostname: config.hostname.clone(),
            env: config.env.clone(),
            argv,
        })
    }
}

/// Entry point of the container process. Returns only on failure.
pub fn run_child(plan: &ChildPlan, gate: ChildEnd) -> i32 {
    let mut stage = ChildStage::Setup;
    if let Err(e) = setup(plan, gate) {
        tracing::error!(error = %e, "container setup failed");
        return stage.failure_code();
    }

    apply_environment(&plan.env);
    stage = ChildStage::ExecRequested;
    let Some(program) = plan.argv.first() else {
        return stage.failure_code();
    };
    tracing::debug!(command = ?program, "executing command");
    let Err(errno) = nix::unistd::execvp(program, &plan.argv);
    tracing::error!(command = ?program, error = %errno, "could not run command");
    report_exec_failure(&mut std::io::stderr(), program, errno);
    stage.failure_code()
}

/// Writes the exec failure to the terminal regardless of the log filter.
fn report_exec_failure(out: &mut impl Write, program: &CStr, errno: Errno) {
    let _ = writeln!(
        out,
        "{BIN_NAME}: {}: {}",
        program.to_string_lossy(),
        errno.desc()
    );
}

fn setup(plan: &ChildPlan, gate: ChildEnd) -> Result<()> {
    gate.wait_ready()?;
    tracing::debug!("released by parent");
    network::setup_container_side()?;
    filesystem::compose_rootfs(&plan.rootfs)?;
    uts::setup_hostname(plan.hostname.as_deref())
}

fn apply_environment(env: &[(String, String)]) {
    // SAFETY: the child is single-threaded after clone, so nothing else
    // reads or writes the environment concurrently.
    unsafe {
        let _ = libc::clearenv();
    }
    for (key, value) in env {
        // SAFETY: as above. Keys and values were validated free of `=` and
        // NUL when the configuration was checked.
        unsafe { std::env::set_var(key, value) };
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use corral_common::types::ContainerId;

    use super::*;

    fn config() -> ContainerConfig {
        let mut cfg = ContainerConfig::new("alpine", vec!["/bin/echo".into(), "hi".into()]);
        cfg.paths.container_base = "/data".into();
        cfg.assign_id(ContainerId::derive(None, 9).unwrap()).unwrap();
        cfg
    }

    #[test]
    fn exec_failure_is_reported_in_one_line() {
        let mut out = Vec::new();
        report_exec_failure(&mut out, c"/no/such/command", Errno::ENOENT);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "corral: /no/such/command: No such file or directory\n"
        );
    }

    #[test]
    fn failure_codes_follow_stage() {
        assert_eq!(ChildStage::Setup.failure_code(), 1);
        assert_eq!(ChildStage::ExecRequested.failure_code(), 127);
    }

    #[test]
    fn plan_carries_layout_and_argv() {
        let cfg = config();
        let plan = ChildPlan::new(&cfg).unwrap();
        let id = cfg.id().unwrap();
        assert_eq!(plan.rootfs.layout.root, Path::new("/data").join(id.as_str()));
        assert_eq!(plan.rootfs.image_rootfs, cfg.image_rootfs());
        assert_eq!(plan.argv, [CString::new("/bin/echo").unwrap(), CString::new("hi").unwrap()]);
        assert_eq!(plan.hostname.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn plan_requires_assigned_id() {
        let cfg = ContainerConfig::new("alpine", vec!["true".into()]);
        assert!(ChildPlan::new(&cfg).unwrap_err().is_config());
    }

    #[test]
    fn plan_rejects_nul_in_arguments() {
        let mut cfg = config();
        cfg.command.push("a\0b".into());
        assert!(ChildPlan::new(&cfg).unwrap_err().is_config());
    }
}
