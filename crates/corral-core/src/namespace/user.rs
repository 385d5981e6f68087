//! User namespace identity mapping.
//!
//! Maps UID/GID 0 inside the container onto the invoking user's UID/GID on
//! the host, one ID wide. The contained process believes it is root but
//! holds no privilege beyond that single host identity.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use corral_common::error::{CorralError, Result};

/// Writes `uid_map`, `setgroups`, and `gid_map` for a child process.
#[derive(Debug, Clone)]
pub struct IdentityMapper {
    proc_root: PathBuf,
}

impl IdentityMapper {
    /// Creates a mapper writing under `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Creates a mapper writing under an alternative proc root.
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Installs the single-entry mapping `0 <host> 1` for UIDs and GIDs.
    ///
    /// `setgroups` is set to `deny` before the GID map is written; the
    /// kernel rejects an unprivileged GID map write otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three files cannot be written.
    pub fn map(&self, child: Pid, host_uid: u32, host_gid: u32) -> Result<()> {
        tracing::debug!(pid = child.as_raw(), host_uid, host_gid, "writing identity map");
        let dir = self.proc_root.join(child.as_raw().to_string());
        write_proc_file(&dir.join("uid_map"), &single_entry(host_uid))?;
        write_proc_file(&dir.join("setgroups"), "deny")?;
        write_proc_file(&dir.join("gid_map"), &single_entry(host_gid))?;
        tracing::debug!(pid = child.as_raw(), "identity map installed");
        Ok(())
    }

    /// Maps the child onto the calling process's real UID and GID.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the mapping files cannot be written.
    pub fn map_current_user(&self, child: Pid) -> Result<()> {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        self.map(child, uid, gid)
    }
}

impl Default for IdentityMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn single_entry(host_id: u32) -> String {
    format!("0 {host_id} 1\n")
}

// Each map file accepts exactly one write, so the content goes out in a
// single `write(2)` without truncation or creation.
fn write_proc_file(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(content.as_bytes())
        .map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(pid: i32) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(pid.to_string());
        std::fs::create_dir(&dir).unwrap();
        for name in ["uid_map", "gid_map", "setgroups"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        root
    }

    fn read(root: &Path, pid: i32, name: &str) -> String {
        std::fs::read_to_string(root.join(pid.to_string()).join(name)).unwrap()
    }

    #[test]
    fn maps_container_root_to_host_ids() {
        let root = fake_proc(4242);
        let mapper = IdentityMapper::with_proc_root(root.path());
        mapper.map(Pid::from_raw(4242), 1000, 100).unwrap();
        assert_eq!(read(root.path(), 4242, "uid_map"), "0 1000 1\n");
        assert_eq!(read(root.path(), 4242, "gid_map"), "0 100 1\n");
        assert_eq!(read(root.path(), 4242, "setgroups"), "deny");
    }

    #[test]
    fn inside_id_is_zero_for_any_host_id() {
        for (uid, gid) in [(0, 0), (1000, 1000), (65_534, 65_534), (4_000_000, 7)] {
            let root = fake_proc(7);
            IdentityMapper::with_proc_root(root.path())
                .map(Pid::from_raw(7), uid, gid)
                .unwrap();
            let uid_map = read(root.path(), 7, "uid_map");
            let gid_map = read(root.path(), 7, "gid_map");
            assert_eq!(uid_map.split_whitespace().next(), Some("0"));
            assert_eq!(gid_map.split_whitespace().next(), Some("0"));
            assert_eq!(uid_map.split_whitespace().last(), Some("1"));
        }
    }

    #[test]
    fn missing_setgroups_stops_before_gid_map() {
        let root = fake_proc(9);
        let dir = root.path().join("9");
        std::fs::remove_file(dir.join("setgroups")).unwrap();
        let err = IdentityMapper::with_proc_root(root.path())
            .map(Pid::from_raw(9), 1000, 1000)
            .unwrap_err();
        assert!(err.to_string().contains("setgroups"));
        assert_eq!(read(root.path(), 9, "gid_map"), "");
    }

    #[test]
    fn missing_process_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let mapper = IdentityMapper::with_proc_root(root.path());
        assert!(mapper.map(Pid::from_raw(1), 0, 0).is_err());
    }
}
