//! CPU resource control via cgroups v2.
//!
//! Builds limits for `cpuset.cpus`, `cpu.weight`, and `cpu.max`.

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimit;

/// Valid range of `cpu.weight`.
pub const WEIGHT_RANGE: std::ops::RangeInclusive<u64> = 1..=10_000;

/// Restricts the container to the first `count` CPUs (`0-<count-1>`).
///
/// # Errors
///
/// Returns an error if `count` is zero.
pub fn cpuset_for_count(count: u32) -> Result<ResourceLimit> {
    if count == 0 {
        return Err(CorralError::config("CPU count must be at least 1"));
    }
    Ok(ResourceLimit::new("cpuset.cpus", format!("0-{}", count - 1)))
}

/// Restricts the container to an explicit cpuset list such as `0,2-3`.
///
/// # Errors
///
/// Returns an error if the list contains anything but digits, `,` and `-`.
pub fn cpuset(spec: &str) -> Result<ResourceLimit> {
    let well_formed = !spec.is_empty()
        && spec
            .split(',')
            .all(|part| !part.is_empty() && part.split('-').all(|n| n.parse::<u32>().is_ok()));
    if !well_formed {
        return Err(CorralError::config(format!("invalid cpuset: {spec}")));
    }
    Ok(ResourceLimit::new("cpuset.cpus", spec))
}

/// Sets the relative CPU weight under contention.
///
/// # Errors
///
/// Returns an error if the weight is outside [`WEIGHT_RANGE`].
pub fn weight(weight: u64) -> Result<ResourceLimit> {
    if !WEIGHT_RANGE.contains(&weight) {
        return Err(CorralError::config(format!(
            "CPU weight {weight} outside {}..={}",
            WEIGHT_RANGE.start(),
            WEIGHT_RANGE.end()
        )));
    }
    Ok(ResourceLimit::new("cpu.weight", weight.to_string()))
}

/// Sets the CPU bandwidth ceiling, written verbatim to `cpu.max`.
///
/// Accepts `max`, `<quota>`, or `<quota> <period>` where quota is `max` or
/// microseconds and period is microseconds.
///
/// # Errors
///
/// Returns an error if the value does not have that shape.
pub fn max(value: &str) -> Result<ResourceLimit> {
    let mut parts = value.split_whitespace();
    let quota_ok = parts
        .next()
        .is_some_and(|q| q == "max" || q.parse::<u64>().is_ok());
    let period_ok = parts.next().is_none_or(|p| p.parse::<u64>().is_ok());
    if !quota_ok || !period_ok || parts.next().is_some() {
        return Err(CorralError::config(format!("invalid cpu.max value: {value}")));
    }
    Ok(ResourceLimit::new("cpu.max", value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_becomes_range() {
        assert_eq!(cpuset_for_count(1).unwrap().value, "0-0");
        assert_eq!(cpuset_for_count(4).unwrap().value, "0-3");
        assert!(cpuset_for_count(0).is_err());
    }

    #[test]
    fn cpuset_accepts_kernel_list_syntax() {
        assert_eq!(cpuset("0,2-3").unwrap().key, "cpuset.cpus");
        assert!(cpuset("0,,1").is_err());
        assert!(cpuset("a-b").is_err());
    }

    #[test]
    fn weight_is_range_checked() {
        assert_eq!(weight(100).unwrap(), ResourceLimit::new("cpu.weight", "100"));
        assert!(weight(0).is_err());
        assert!(weight(10_001).is_err());
    }

    #[test]
    fn cpu_max_accepts_quota_and_period() {
        assert_eq!(max("max").unwrap().value, "max");
        assert_eq!(max("50000 100000").unwrap().value, "50000 100000");
        assert!(max("lots").is_err());
        assert!(max("1 2 3").is_err());
    }
}
