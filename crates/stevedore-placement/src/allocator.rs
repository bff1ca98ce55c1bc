//! Count-balancing allocation over an immutable distribution snapshot.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

/// Errors from plan computation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    /// The host pool is empty; nothing can be placed anywhere.
    #[error("no hosts available for allocation")]
    NoHostsAvailable,
}

/// Per-host count of new instances to launch for one deploy. Transient;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    /// host → number of instances to launch there.
    pub per_host: BTreeMap<String, u32>,
}

impl AllocationPlan {
    /// Total instances the plan launches.
    pub fn total(&self) -> u32 {
        self.per_host.values().sum()
    }

    /// Hosts receiving at least one instance, with their counts.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, u32)> {
        self.per_host
            .iter()
            .filter(|&(_, &n)| n > 0)
            .map(|(h, &n)| (h.as_str(), n))
    }
}

/// Compute a placement plan for `desired` new instances.
///
/// `distribution` maps every known host to its current running-container
/// count; hosts with nothing running must still appear with count 0.
///
/// The ideal per-host total is `ceil((current_total + desired) / hosts)`.
/// Hosts are visited round-robin in fixed (sorted) order; each visit grants
/// one unit to a host still below the ideal. Each full round strictly
/// shrinks the remaining deficit, so the loop terminates once `desired`
/// units are placed.
pub fn allocate(
    desired: u32,
    distribution: &BTreeMap<String, u32>,
) -> Result<AllocationPlan, PlacementError> {
    if distribution.is_empty() {
        return Err(PlacementError::NoHostsAvailable);
    }

    let hosts: Vec<&String> = distribution.keys().collect();
    let current_total: u32 = distribution.values().sum();
    let ideal_per_host = (current_total + desired).div_ceil(hosts.len() as u32);

    let mut per_host: BTreeMap<String, u32> =
        hosts.iter().map(|h| ((*h).clone(), 0)).collect();

    let mut remaining = desired;
    let mut cursor = 0usize;
    while remaining > 0 {
        let host = hosts[cursor % hosts.len()];
        cursor += 1;
        let allocated = per_host.get_mut(host).filter(|n| distribution[host] + **n < ideal_per_host);
        if let Some(allocated) = allocated {
            *allocated += 1;
            remaining -= 1;
        }
    }

    debug!(desired, ideal_per_host, plan = ?per_host, "allocation computed");
    Ok(AllocationPlan { per_host })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries
            .iter()
            .map(|(h, n)| (h.to_string(), *n))
            .collect()
    }

    #[test]
    fn empty_pool_is_an_error() {
        assert_eq!(
            allocate(3, &BTreeMap::new()),
            Err(PlacementError::NoHostsAvailable)
        );
    }

    #[test]
    fn zero_desired_yields_all_zero_plan() {
        let plan = allocate(0, &dist(&[("a", 4), ("b", 0)])).unwrap();
        assert_eq!(plan.total(), 0);
        assert_eq!(plan.per_host.len(), 2);
        assert!(plan.assignments().next().is_none());
    }

    #[test]
    fn single_empty_host_takes_everything() {
        let plan = allocate(2, &dist(&[("a", 0)])).unwrap();
        assert_eq!(plan.per_host["a"], 2);
    }

    #[test]
    fn allocation_sums_to_desired() {
        for desired in [1u32, 3, 7, 16] {
            let plan = allocate(desired, &dist(&[("a", 2), ("b", 5), ("c", 0)])).unwrap();
            assert_eq!(plan.total(), desired, "desired={desired}");
        }
    }

    #[test]
    fn new_instances_favor_less_loaded_hosts() {
        // ideal = ceil((6 + 2) / 2) = 4; the loaded host is already there.
        let plan = allocate(2, &dist(&[("busy", 6), ("idle", 0)])).unwrap();
        assert_eq!(plan.per_host["idle"], 2);
        assert_eq!(plan.per_host["busy"], 0);
    }

    #[test]
    fn final_totals_stay_balanced() {
        // No host may end more than one unit above the least-loaded host's
        // final total when allocation starts from an even distribution.
        let starting = dist(&[("a", 1), ("b", 1), ("c", 1)]);
        let plan = allocate(7, &starting).unwrap();

        let totals: Vec<u32> = starting
            .iter()
            .map(|(h, n)| n + plan.per_host[h])
            .collect();
        let min = *totals.iter().min().unwrap();
        let max = *totals.iter().max().unwrap();
        assert!(max - min <= 1, "unbalanced totals: {totals:?}");
        assert_eq!(plan.total(), 7);
    }

    #[test]
    fn plan_is_deterministic_over_the_same_snapshot() {
        let snapshot = dist(&[("a", 3), ("b", 1), ("c", 2)]);
        let first = allocate(5, &snapshot).unwrap();
        let second = allocate(5, &snapshot).unwrap();
        assert_eq!(first, second);
    }
}
