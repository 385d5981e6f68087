//! System-wide constants, default paths, and declared limits.

/// Default directory holding image root filesystems (`<base>/<image>/rootfs`).
pub const DEFAULT_IMAGE_BASE: &str = "/var/lib/corral/images";

/// Default directory holding per-container overlay data.
pub const DEFAULT_CONTAINER_BASE: &str = "/var/lib/corral/containers";

/// Default parent cgroup under which per-container cgroups are created.
pub const DEFAULT_CGROUP_BASE: &str = "/sys/fs/cgroup/system.slice";

/// Default host-side veth provisioning collaborator.
pub const DEFAULT_NETWORK_SCRIPT: &str = "./scripts/setup_veth.sh";

/// Default name of the shared host bridge.
pub const DEFAULT_BRIDGE: &str = "corral0";

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Name of the image subdirectory that holds the root filesystem.
pub const IMAGE_ROOTFS_DIR: &str = "rootfs";

/// Environment injected into every container before user overrides.
pub const DEFAULT_ENV: [(&str, &str); 4] = [
    ("PATH", "/bin:/sbin:/usr/bin:/usr/sbin"),
    ("HOME", "/root"),
    ("USER", "root"),
    ("TERM", "xterm-256color"),
];

/// Length of a generated container ID in hex characters.
pub const CONTAINER_ID_LEN_MAX: usize = 64;

/// Length of the ID prefix used in network interface names.
///
/// Kernel interface names are capped at 15 characters and the collaborator
/// decorates the prefix (`veth<id>`, `ceth<id>`).
pub const SHORT_ID_LEN: usize = 5;

/// Maximum hostname length accepted by `sethostname(2)`.
pub const HOSTNAME_LEN_MAX: usize = 64;

/// Cgroup interface-file keys must be strictly shorter than this.
pub const CGROUP_KEY_LEN_MAX: usize = 50;

/// Upper bound for any composed filesystem path (`PATH_MAX`).
pub const PATH_LEN_MAX: usize = 4096;

/// Name of the cgroup membership file.
pub const CGROUP_PROCS_FILE: &str = "cgroup.procs";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "corral";
