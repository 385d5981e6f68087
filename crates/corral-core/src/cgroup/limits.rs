//! Generic cgroup interface-file writer.
//!
//! A limit is a `(key, value)` pair: `value` is written verbatim to
//! `<cgroup>/<key>`. Every key is validated before the first write, so a
//! malformed list leaves the cgroup untouched.

use std::io::Write;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimit;

/// Writes each limit to its interface file, in order.
///
/// # Errors
///
/// Returns a configuration error if any key is invalid (nothing is written
/// in that case), or an I/O error naming the file that rejected its value.
pub fn write_limits(cgroup_path: &Path, limits: &[ResourceLimit]) -> Result<()> {
    for limit in limits {
        limit.validate()?;
    }
    for limit in limits {
        write_limit(cgroup_path, limit)?;
    }
    Ok(())
}

// Interface files already exist in cgroupfs; they are opened write-only
// without creation so a typo in a key surfaces as ENOENT.
fn write_limit(cgroup_path: &Path, limit: &ResourceLimit) -> Result<()> {
    let file = cgroup_path.join(&limit.key);
    tracing::debug!(file = %file.display(), value = %limit.value, "setting cgroup limit");
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&file)
        .and_then(|mut f| f.write_all(limit.value.as_bytes()))
        .map_err(|e| CorralError::Io {
            path: file,
            source: e,
        })
}
