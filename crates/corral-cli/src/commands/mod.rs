//! Command-line definition.

pub mod run;

use std::path::PathBuf;

use clap::Parser;

use corral_common::config::{HostPaths, LogConfig, LogFormat};
use corral_common::constants::{
    BIN_NAME, DEFAULT_BRIDGE, DEFAULT_CGROUP_BASE, DEFAULT_CONTAINER_BASE, DEFAULT_IMAGE_BASE,
    DEFAULT_NETWORK_SCRIPT,
};
use corral_common::error::CorralError;
use corral_common::types::{ResourceLimit, parse_env_assignment};
use corral_core::cgroup::{cpu, memory};
use corral_core::filesystem::mount::MountSpec;
use corral_runtime::ContainerConfig;

/// Run one command in a fresh, isolated container.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Hostname inside the container [default: the container ID].
    #[arg(long)]
    pub hostname: Option<String>,

    /// Remove the container's cgroup and data after it exits.
    #[arg(long)]
    pub rm: bool,

    /// Directory holding `<image>/rootfs` trees.
    #[arg(long, env = "CORRAL_IMAGE_BASE", default_value = DEFAULT_IMAGE_BASE)]
    pub image_base: PathBuf,

    /// Directory for per-container overlay data.
    #[arg(long, env = "CORRAL_CONTAINER_BASE", default_value = DEFAULT_CONTAINER_BASE)]
    pub container_base: PathBuf,

    /// Parent cgroup for container cgroups.
    #[arg(long, env = "CORRAL_CGROUP_BASE", default_value = DEFAULT_CGROUP_BASE)]
    pub cgroup_base: PathBuf,

    /// Memory limit in megabytes (`memory.max`).
    #[arg(short, long, value_name = "MB")]
    pub memory: Option<u64>,

    /// Number of CPUs, starting at CPU 0 (`cpuset.cpus`).
    #[arg(long, value_name = "N")]
    pub cpus: Option<u32>,

    /// Explicit CPU list, e.g. `0,2-3` (`cpuset.cpus`).
    #[arg(long, value_name = "LIST")]
    pub cpuset_cpus: Option<String>,

    /// Relative CPU weight, 1-10000 (`cpu.weight`).
    #[arg(long, value_name = "WEIGHT")]
    pub cpu_weight: Option<u64>,

    /// CPU bandwidth, `max` or `<quota> [<period>]` in µs (`cpu.max`).
    #[arg(long, value_name = "QUOTA")]
    pub cpu_max: Option<String>,

    /// Environment variable for the command; repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Bind mount from the host; repeatable.
    #[arg(short = 'v', long = "volume", value_name = "SRC:DST[:ro|rw]", value_parser = parse_volume)]
    pub volumes: Vec<MountSpec>,

    /// Static address for the container, e.g. `10.10.0.2/24`.
    #[arg(long, requires = "gateway")]
    pub ip: Option<String>,

    /// Default gateway for the container.
    #[arg(long, requires = "ip")]
    pub gateway: Option<String>,

    /// Host-side script that wires the veth pair.
    #[arg(long, default_value = DEFAULT_NETWORK_SCRIPT)]
    pub network_script: PathBuf,

    /// Host bridge for container veth pairs.
    #[arg(long, default_value = DEFAULT_BRIDGE)]
    pub bridge: String,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Log output format: `text` or `json`.
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Image name under the image base.
    pub image: String,

    /// Command to run, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_env(input: &str) -> Result<(String, String), CorralError> {
    parse_env_assignment(input)
}

fn parse_volume(input: &str) -> Result<MountSpec, CorralError> {
    MountSpec::parse(input)
}

impl Cli {
    /// Logger settings selected by the flags.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        let config = LogConfig {
            format: self.log_format,
            ..LogConfig::default()
        };
        if self.debug { config.debug() } else { config }
    }

    /// Resource limits, in flag order: memory, CPU count, CPU list, weight,
    /// bandwidth.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit value is out of range.
    pub fn limits(&self) -> Result<Vec<ResourceLimit>, CorralError> {
        let mut limits = Vec::new();
        if let Some(mb) = self.memory {
            limits.push(memory::max_from_megabytes(mb)?);
        }
        if let Some(count) = self.cpus {
            limits.push(cpu::cpuset_for_count(count)?);
        }
        if let Some(list) = &self.cpuset_cpus {
            limits.push(cpu::cpuset(list)?);
        }
        if let Some(weight) = self.cpu_weight {
            limits.push(cpu::weight(weight)?);
        }
        if let Some(value) = &self.cpu_max {
            limits.push(cpu::max(value)?);
        }
        Ok(limits)
    }

    /// Converts the flags into a container configuration.
    ///
    /// User `--env` entries are appended after the defaults, so they win.
    ///
    /// # Errors
    ///
    /// Returns an error if a limit is invalid.
    pub fn into_config(self) -> Result<ContainerConfig, CorralError> {
        let limits = self.limits()?;
        let mut config = ContainerConfig::new(self.image, self.command);
        config.paths = HostPaths {
            image_base: self.image_base,
            container_base: self.container_base,
            cgroup_base: self.cgroup_base,
        };
        config.hostname = self.hostname;
        config.limits = limits;
        config.remove_on_exit = self.rm;
        config.env.extend(self.env);
        config.mounts = self.volumes;
        config.ip = self.ip;
        config.gateway = self.gateway;
        config.network_script = self.network_script;
        config.bridge = self.bridge;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use corral_common::config::LogLevel;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("corral").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_arguments_are_not_taken_as_flags() {
        let cli = parse(&["--rm", "alpine", "ls", "-la", "--color"]);
        assert!(cli.rm);
        assert_eq!(cli.image, "alpine");
        assert_eq!(cli.command, ["ls", "-la", "--color"]);
    }

    #[test]
    fn image_and_command_are_required() {
        assert!(Cli::try_parse_from(["corral"]).is_err());
        assert!(Cli::try_parse_from(["corral", "alpine"]).is_err());
    }

    #[test]
    fn ip_requires_gateway() {
        assert!(Cli::try_parse_from(["corral", "--ip", "10.0.0.2/24", "alpine", "sh"]).is_err());
        let cli = parse(&["--ip", "10.0.0.2/24", "--gateway", "10.0.0.1", "alpine", "sh"]);
        assert_eq!(cli.gateway.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn limits_follow_flag_semantics() {
        let cli = parse(&[
            "-m", "128", "--cpus", "2", "--cpu-weight", "50", "--cpu-max", "50000 100000", "alpine", "sh",
        ]);
        let limits = cli.limits().unwrap();
        assert_eq!(
            limits,
            [
                ResourceLimit::new("memory.max", "134217728"),
                ResourceLimit::new("cpuset.cpus", "0-1"),
                ResourceLimit::new("cpu.weight", "50"),
                ResourceLimit::new("cpu.max", "50000 100000"),
            ]
        );
    }

    #[test]
    fn out_of_range_limit_is_rejected() {
        let cli = parse(&["--cpu-weight", "0", "alpine", "sh"]);
        assert!(cli.limits().unwrap_err().is_config());
    }

    #[test]
    fn env_and_volumes_are_parsed_at_the_command_line() {
        let cli = parse(&["-e", "A=1", "-e", "B=x=y", "-v", "/srv:/data:ro", "alpine", "sh"]);
        assert_eq!(
            cli.env,
            [
                ("A".to_owned(), "1".to_owned()),
                ("B".to_owned(), "x=y".to_owned())
            ]
        );
        assert!(cli.volumes[0].is_read_only());
        assert!(Cli::try_parse_from(["corral", "-e", "NOVALUE", "alpine", "sh"]).is_err());
        assert!(Cli::try_parse_from(["corral", "-v", "/a:/b:rx", "alpine", "sh"]).is_err());
    }

    #[test]
    fn config_appends_user_env_after_defaults() {
        let config = parse(&["--hostname", "box", "-e", "PATH=/custom", "alpine", "sh"])
            .into_config()
            .unwrap();
        assert_eq!(config.hostname.as_deref(), Some("box"));
        assert_eq!(config.env.last().unwrap(), &("PATH".to_owned(), "/custom".to_owned()));
        assert_eq!(config.env.first().unwrap().0, "PATH");
    }

    #[test]
    fn debug_and_format_select_log_config() {
        let cli = parse(&["--debug", "--log-format", "json", "alpine", "sh"]);
        let log = cli.log_config();
        assert_eq!(log.level, LogLevel::Debug);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(parse(&["alpine", "sh"]).log_config(), LogConfig::default());
    }
}
