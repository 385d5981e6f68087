//! Parent-side confinement of a freshly spawned child.
//!
//! The child is parked on the readiness channel while the parent admits it
//! into its cgroup (fallback spawns only), installs its identity mapping,
//! and wires its network. Only then is the child released. A failing step
//! returns before the signal is sent.

use std::path::PathBuf;

use nix::unistd::Pid;

use corral_common::error::Result;
use corral_common::types::ContainerId;
use corral_core::cgroup::CgroupManager;
use corral_core::namespace::network::{self, StaticAddress};
use corral_core::namespace::user::IdentityMapper;
use corral_core::namespace::{CgroupPlacement, Spawned};

use crate::config::ContainerConfig;
use crate::handshake::ReadyGate;

/// Host-side steps applied to a parked child.
pub trait HostConfinement {
    /// Moves the child into its cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership write fails.
    fn admit(&mut self, child: Pid) -> Result<()>;

    /// Maps the child's root identity onto the invoking user.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping files cannot be written.
    fn map_identity(&mut self, child: Pid) -> Result<()>;

    /// Connects the child's network namespace to the host.
    ///
    /// # Errors
    ///
    /// Returns an error if host-side wiring fails.
    fn wire_network(&mut self, child: Pid) -> Result<()>;
}

/// Runs every host-side step, then releases the child.
///
/// # Errors
///
/// Returns the first failing step's error; the child is not released.
pub fn confine_then_release<H, G>(spawned: Spawned, host: &mut H, gate: &mut G) -> Result<()>
where
    H: HostConfinement + ?Sized,
    G: ReadyGate + ?Sized,
{
    if spawned.placement == CgroupPlacement::Pending {
        host.admit(spawned.pid)?;
    }
    host.map_identity(spawned.pid)?;
    host.wire_network(spawned.pid)?;
    gate.release()
}

/// Host wiring for a container with a static address.
#[derive(Debug, Clone)]
pub struct HostNetwork {
    /// Resolved collaborator executable.
    pub script: PathBuf,
    /// Bridge the veth pair is attached to.
    pub bridge: String,
    /// Interface name prefix.
    pub short_id: String,
    /// Container-side address and gateway.
    pub address: StaticAddress,
}

impl HostNetwork {
    /// Builds the wiring plan, or `None` when no static address is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator cannot be found.
    pub fn resolve(config: &ContainerConfig, id: &ContainerId) -> Result<Option<Self>> {
        let Some(address) = config.static_address() else {
            return Ok(None);
        };
        Ok(Some(Self {
            script: network::resolve_collaborator(&config.network_script)?,
            bridge: config.bridge.clone(),
            short_id: id.short().to_owned(),
            address,
        }))
    }
}

/// The real host: cgroupfs, procfs, and the network collaborator.
#[derive(Debug)]
pub struct KernelConfinement<'a> {
    cgroup: &'a CgroupManager,
    mapper: IdentityMapper,
    network: Option<&'a HostNetwork>,
}

impl<'a> KernelConfinement<'a> {
    /// Confinement against the live kernel.
    #[must_use]
    pub fn new(cgroup: &'a CgroupManager, network: Option<&'a HostNetwork>) -> Self {
        Self {
            cgroup,
            mapper: IdentityMapper::new(),
            network,
        }
    }
}

impl HostConfinement for KernelConfinement<'_> {
    fn admit(&mut self, child: Pid) -> Result<()> {
        self.cgroup.add_process(child)
    }

    fn map_identity(&mut self, child: Pid) -> Result<()> {
        self.mapper.map_current_user(child)
    }

    fn wire_network(&mut self, child: Pid) -> Result<()> {
        let Some(net) = self.network else {
            tracing::debug!("no static address, container keeps loopback only");
            return Ok(());
        };
        network::setup_host_bridge(&net.bridge)?;
        network::setup_host_side(&net.script, &net.bridge, &net.short_id, child, &net.address)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use corral_common::error::CorralError;

    use super::*;

    type Journal = Rc<RefCell<Vec<&'static str>>>;

    struct MockHost {
        journal: Journal,
        fail_at: Option<&'static str>,
    }

    impl MockHost {
        fn step(&self, name: &'static str) -> Result<()> {
            self.journal.borrow_mut().push(name);
            if self.fail_at == Some(name) {
                return Err(CorralError::config(format!("{name} failed")));
            }
            Ok(())
        }
    }

    impl HostConfinement for MockHost {
        fn admit(&mut self, _child: Pid) -> Result<()> {
            self.step("admit")
        }

        fn map_identity(&mut self, _child: Pid) -> Result<()> {
            self.step("map_identity")
        }

        fn wire_network(&mut self, _child: Pid) -> Result<()> {
            self.step("wire_network")
        }
    }

    struct MockGate(Journal);

    impl ReadyGate for MockGate {
        fn release(&mut self) -> Result<()> {
            self.0.borrow_mut().push("release");
            Ok(())
        }
    }

    fn run(placement: CgroupPlacement, fail_at: Option<&'static str>) -> (Result<()>, Vec<&'static str>) {
        let journal = Journal::default();
        let mut host = MockHost {
            journal: Rc::clone(&journal),
            fail_at,
        };
        let mut gate = MockGate(Rc::clone(&journal));
        let spawned = Spawned {
            pid: Pid::from_raw(100),
            placement,
        };
        let result = confine_then_release(spawned, &mut host, &mut gate);
        let steps = journal.borrow().clone();
        (result, steps)
    }

    #[test]
    fn release_comes_after_every_step() {
        let (result, steps) = run(CgroupPlacement::Pending, None);
        result.unwrap();
        assert_eq!(steps, ["admit", "map_identity", "wire_network", "release"]);
    }

    #[test]
    fn atomic_placement_skips_admission() {
        let (result, steps) = run(CgroupPlacement::AtClone, None);
        result.unwrap();
        assert_eq!(steps, ["map_identity", "wire_network", "release"]);
    }

    #[test]
    fn failing_step_never_releases() {
        for step in ["admit", "map_identity", "wire_network"] {
            let (result, steps) = run(CgroupPlacement::Pending, Some(step));
            assert!(result.is_err());
            assert_eq!(steps.last(), Some(&step));
            assert!(!steps.contains(&"release"), "released after {step} failed");
        }
    }

    #[test]
    fn no_static_address_means_no_host_network() {
        let mut config = ContainerConfig::new("alpine", vec!["true".into()]);
        let id = ContainerId::derive(None, 1).unwrap();
        assert!(HostNetwork::resolve(&config, &id).unwrap().is_none());

        config.ip = Some("10.0.0.2/24".into());
        config.gateway = Some("10.0.0.1".into());
        config.network_script = PathBuf::from("/nonexistent/setup_veth.sh");
        assert!(HostNetwork::resolve(&config, &id).unwrap_err().is_config());
    }
}
