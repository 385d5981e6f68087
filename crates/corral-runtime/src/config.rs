//! Per-run container configuration.

use std::path::PathBuf;

use corral_common::config::HostPaths;
use corral_common::constants::{DEFAULT_BRIDGE, DEFAULT_ENV, DEFAULT_NETWORK_SCRIPT, IMAGE_ROOTFS_DIR};
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ResourceLimit, validate_hostname};
use corral_core::filesystem::mount::MountSpec;
use corral_core::namespace::network::StaticAddress;

/// Everything one `corral` invocation needs to build and run a container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Host directories for images, container data, and cgroups.
    pub paths: HostPaths,
    /// Image name, resolved as `<image_base>/<image>/rootfs`.
    pub image: String,
    /// Hostname inside the container; defaults to the container ID.
    pub hostname: Option<String>,
    /// Cgroup interface-file writes, applied in order.
    pub limits: Vec<ResourceLimit>,
    /// Remove the cgroup and container data after the command exits.
    pub remove_on_exit: bool,
    /// Environment for the command, applied in order; later keys win.
    pub env: Vec<(String, String)>,
    /// User bind mounts.
    pub mounts: Vec<MountSpec>,
    /// Command and arguments, looked up on the container's `PATH`.
    pub command: Vec<String>,
    /// Static address for the container's veth interface.
    pub ip: Option<String>,
    /// Default gateway for the container's veth interface.
    pub gateway: Option<String>,
    /// Host-side collaborator that wires the veth pair.
    pub network_script: PathBuf,
    /// Host bridge the veth pair is attached to.
    pub bridge: String,
    id: Option<ContainerId>,
}

impl ContainerConfig {
    /// Creates a configuration with default paths and environment.
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            paths: HostPaths::default(),
            image: image.into(),
            hostname: None,
            limits: Vec::new(),
            remove_on_exit: false,
            env: DEFAULT_ENV
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            mounts: Vec::new(),
            command,
            ip: None,
            gateway: None,
            network_script: PathBuf::from(DEFAULT_NETWORK_SCRIPT),
            bridge: DEFAULT_BRIDGE.to_owned(),
            id: None,
        }
    }

    /// Checks everything that can be checked before touching the kernel.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty()
            || self.image == "."
            || self.image == ".."
            || self.image.contains('/')
        {
            return Err(CorralError::config(format!(
                "invalid image name: {:?}",
                self.image
            )));
        }
        if self.command.is_empty() {
            return Err(CorralError::config("no command given"));
        }
        if self.command.iter().any(|arg| arg.contains('\0')) {
            return Err(CorralError::config("command contains a NUL byte"));
        }
        if self.paths.container_base.as_os_str().is_empty() {
            return Err(CorralError::config("container base path is empty"));
        }
        if let Some(hostname) = &self.hostname {
            validate_hostname(hostname)?;
        }
        for limit in &self.limits {
            limit.validate()?;
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains(['=', '\0']) || value.contains('\0') {
                return Err(CorralError::config(format!(
                    "invalid environment variable: {key:?}"
                )));
            }
        }
        if self.ip.is_some() != self.gateway.is_some() {
            return Err(CorralError::config(
                "--ip and --gateway must be given together",
            ));
        }
        Ok(())
    }

    /// Assigns the container ID and, if none was set, adopts it as hostname.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an ID was already assigned.
    pub fn assign_id(&mut self, id: ContainerId) -> Result<()> {
        if let Some(existing) = &self.id {
            return Err(CorralError::config(format!(
                "container ID already assigned: {existing}"
            )));
        }
        if self.hostname.is_none() {
            self.hostname = Some(id.as_str().to_owned());
        }
        self.id = Some(id);
        Ok(())
    }

    /// The assigned container ID.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no ID has been assigned yet.
    pub fn id(&self) -> Result<&ContainerId> {
        self.id
            .as_ref()
            .ok_or_else(|| CorralError::config("container ID not assigned"))
    }

    /// `<image_base>/<image>/rootfs`.
    #[must_use]
    pub fn image_rootfs(&self) -> PathBuf {
        self.paths
            .image_base
            .join(&self.image)
            .join(IMAGE_ROOTFS_DIR)
    }

    /// Static addressing, when both IP and gateway are configured.
    #[must_use]
    pub fn static_address(&self) -> Option<StaticAddress> {
        match (&self.ip, &self.gateway) {
            (Some(ip), Some(gateway)) => Some(StaticAddress {
                ip: ip.clone(),
                gateway: gateway.clone(),
            }),
            _ => None,
        }
    }
}
