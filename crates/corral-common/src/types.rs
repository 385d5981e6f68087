//! Domain primitive types used across the corral workspace.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{CGROUP_KEY_LEN_MAX, CONTAINER_ID_LEN_MAX, HOSTNAME_LEN_MAX, SHORT_ID_LEN};
use crate::error::{CorralError, Result};

/// Unique identifier for a container instance.
///
/// A lowercase hex SHA-256 digest of the hostname (when given) followed by
/// a microsecond timestamp. Names the container's data directory and its
/// cgroup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Generates an ID from the hostname and the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname exceeds [`HOSTNAME_LEN_MAX`].
    pub fn generate(hostname: Option<&str>) -> Result<Self> {
        Self::derive(hostname, chrono::Utc::now().timestamp_micros())
    }

    /// Derives an ID from a hostname and an explicit microsecond timestamp.
    ///
    /// Two calls with the same inputs produce the same ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname exceeds [`HOSTNAME_LEN_MAX`].
    pub fn derive(hostname: Option<&str>, timestamp_us: i64) -> Result<Self> {
        let seed = match hostname {
            Some(name) => {
                validate_hostname(name)?;
                format!("{name}{timestamp_us}")
            }
            None => timestamp_us.to_string(),
        };
        let digest = Sha256::digest(seed.as_bytes());
        Ok(Self(format!("{digest:x}")))
    }

    /// Wraps an existing ID string after checking its shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty, longer than
    /// [`CONTAINER_ID_LEN_MAX`], or not lowercase hex.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let well_formed = !id.is_empty()
            && id.len() <= CONTAINER_ID_LEN_MAX
            && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(CorralError::config(format!("malformed container ID: {id}")));
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the prefix used to name host network interfaces.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LEN.min(self.0.len())]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks a hostname against the UTS namespace limit.
///
/// # Errors
///
/// Returns an error if the hostname is empty or too long.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() {
        return Err(CorralError::config("hostname is empty"));
    }
    if hostname.len() > HOSTNAME_LEN_MAX {
        return Err(CorralError::config(format!(
            "hostname is {} bytes, limit is {HOSTNAME_LEN_MAX}",
            hostname.len()
        )));
    }
    Ok(())
}

/// A single cgroup interface-file write: `<cgroup>/<key>` receives `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// Interface file name relative to the container's cgroup directory.
    pub key: String,
    /// Literal value written to the file.
    pub value: String,
}

impl ResourceLimit {
    /// Creates a limit without validating it.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Checks the key against the declared limit and file-name rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, at or above
    /// [`CGROUP_KEY_LEN_MAX`] bytes, or not a plain file name.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(CorralError::config("cgroup limit key is empty"));
        }
        if self.key.len() >= CGROUP_KEY_LEN_MAX {
            return Err(CorralError::config(format!(
                "cgroup limit key too long ({} bytes, limit {}): {}",
                self.key.len(),
                CGROUP_KEY_LEN_MAX - 1,
                self.key
            )));
        }
        if self.key.contains('/') || self.key == "." || self.key == ".." {
            return Err(CorralError::config(format!(
                "cgroup limit key is not a file name: {}",
                self.key
            )));
        }
        Ok(())
    }

    /// Returns the controller that owns this interface file (`memory.max` -> `memory`).
    #[must_use]
    pub fn controller(&self) -> &str {
        self.key.split_once('.').map_or(self.key.as_str(), |(c, _)| c)
    }
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Parses a `KEY=VALUE` environment assignment.
///
/// Only the first `=` separates key from value.
///
/// # Errors
///
/// Returns an error if the `=` is missing or either side is empty.
pub fn parse_env_assignment(input: &str) -> Result<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_owned(), value.to_owned()))
        }
        _ => Err(CorralError::config(format!(
            "invalid environment variable format: {input}"
        ))),
    }
}

/// How the container's init process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    /// Exited normally with the given status code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ExitOutcome {
    /// Maps the outcome onto a shell-style process exit code.
    ///
    /// Signal deaths map to `128 + signo`.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        let code = match self {
            Self::Exited(code) => code,
            Self::Signaled(signo) => 128 + signo,
        };
        u8::try_from(code & 0xff).unwrap_or(u8::MAX)
    }

    /// Returns `true` if the command exited with status 0.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signo) => write!(f, "killed by signal {signo}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_fixed_length_hex() {
        let id = ContainerId::generate(Some("web")).unwrap();
        assert_eq!(id.as_str().len(), CONTAINER_ID_LEN_MAX);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn different_timestamps_give_different_ids() {
        let a = ContainerId::derive(Some("web"), 1_700_000_000_000_000).unwrap();
        let b = ContainerId::derive(Some("web"), 1_700_000_000_000_001).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn same_microsecond_and_hostname_collide() {
        let a = ContainerId::derive(Some("web"), 42).unwrap();
        let b = ContainerId::derive(Some("web"), 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn id_without_hostname_hashes_timestamp_only() {
        let a = ContainerId::derive(None, 42).unwrap();
        let b = ContainerId::derive(Some(""), 42);
        assert_eq!(a.as_str().len(), CONTAINER_ID_LEN_MAX);
        assert!(b.is_err());
    }

    #[test]
    fn overlong_hostname_is_rejected() {
        let name = "h".repeat(HOSTNAME_LEN_MAX + 1);
        assert!(ContainerId::derive(Some(&name), 1).unwrap_err().is_config());
    }

    #[test]
    fn short_id_is_prefix() {
        let id = ContainerId::derive(None, 7).unwrap();
        assert_eq!(id.short().len(), SHORT_ID_LEN);
        assert!(id.as_str().starts_with(id.short()));
    }

    #[test]
    fn parse_rejects_non_hex() {
        assert!(ContainerId::parse("abc123").is_ok());
        assert!(ContainerId::parse("ABC").is_err());
        assert!(ContainerId::parse("../etc").is_err());
        assert!(ContainerId::parse("").is_err());
    }

    #[test]
    fn limit_key_bound_is_exclusive() {
        let ok = ResourceLimit::new("k".repeat(CGROUP_KEY_LEN_MAX - 1), "1");
        let too_long = ResourceLimit::new("k".repeat(CGROUP_KEY_LEN_MAX), "1");
        assert!(ok.validate().is_ok());
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn limit_key_must_be_file_name() {
        assert!(ResourceLimit::new("../cgroup.procs", "1").validate().is_err());
        assert!(ResourceLimit::new("..", "1").validate().is_err());
    }

    #[test]
    fn limit_controller_is_key_prefix() {
        assert_eq!(ResourceLimit::new("memory.max", "1").controller(), "memory");
        assert_eq!(ResourceLimit::new("cpuset.cpus", "0").controller(), "cpuset");
    }

    #[test]
    fn env_assignment_splits_on_first_equals() {
        assert_eq!(
            parse_env_assignment("OPTS=a=b").unwrap(),
            ("OPTS".to_owned(), "a=b".to_owned())
        );
        assert!(parse_env_assignment("NOVALUE=").is_err());
        assert!(parse_env_assignment("=x").is_err());
        assert!(parse_env_assignment("PLAIN").is_err());
    }

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(ExitOutcome::Exited(0).exit_code(), 0);
        assert_eq!(ExitOutcome::Exited(3).exit_code(), 3);
        assert_eq!(ExitOutcome::Signaled(9).exit_code(), 137);
        assert!(ExitOutcome::Exited(0).success());
        assert!(!ExitOutcome::Signaled(15).success());
    }
}
