//! Host-level configuration models: storage roots and logging.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::CorralError;

/// Host directories the runtime reads images from and writes state to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    /// Directory holding `<image>/rootfs` trees.
    pub image_base: PathBuf,
    /// Directory under which `<id>/{lower,diff,work,merged}` is created.
    pub container_base: PathBuf,
    /// Parent cgroup under which `<id>` is created.
    pub cgroup_base: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            image_base: PathBuf::from(constants::DEFAULT_IMAGE_BASE),
            container_base: PathBuf::from(constants::DEFAULT_CONTAINER_BASE),
            cgroup_base: PathBuf::from(constants::DEFAULT_CGROUP_BASE),
        }
    }
}

/// Verbosity of the diagnostic log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Lifecycle milestones.
    #[default]
    Info,
    /// Every setup step.
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Output encoding of the diagnostic log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CorralError::config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logger configuration handed to whoever installs the subscriber.
///
/// Nothing in the workspace keeps a process-wide level; the binary builds
/// one subscriber from this value and tests may install their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output encoding.
    pub format: LogFormat,
}

impl LogConfig {
    /// Returns a config with the level raised to `Debug`.
    #[must_use]
    pub const fn debug(mut self) -> Self {
        self.level = LogLevel::Debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_constants() {
        let paths = HostPaths::default();
        assert_eq!(paths.cgroup_base, PathBuf::from(constants::DEFAULT_CGROUP_BASE));
        assert_eq!(paths.image_base, PathBuf::from(constants::DEFAULT_IMAGE_BASE));
    }

    #[test]
    fn log_config_debug_raises_level() {
        let cfg = LogConfig::default().debug();
        assert_eq!(cfg.level, LogLevel::Debug);
        assert_eq!(cfg.level.to_string(), "debug");
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
