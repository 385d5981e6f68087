//! Memory limits via cgroups v2 (`memory.max`).

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimit;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Builds a hard memory ceiling from a size in mebibytes.
///
/// # Errors
///
/// Returns an error if the size is zero or overflows a byte count.
pub fn max_from_megabytes(megabytes: u64) -> Result<ResourceLimit> {
    if megabytes == 0 {
        return Err(CorralError::config("memory limit must be at least 1 MB"));
    }
    let bytes = megabytes
        .checked_mul(BYTES_PER_MIB)
        .ok_or_else(|| CorralError::config(format!("memory limit too large: {megabytes} MB")))?;
    Ok(ResourceLimit::new("memory.max", bytes.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_become_bytes() {
        let limit = max_from_megabytes(128).unwrap();
        assert_eq!(limit, ResourceLimit::new("memory.max", "134217728"));
    }

    #[test]
    fn zero_and_overflow_are_rejected() {
        assert!(max_from_megabytes(0).is_err());
        assert!(max_from_megabytes(u64::MAX).is_err());
    }
}
