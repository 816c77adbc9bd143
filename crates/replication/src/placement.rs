//! Owner selection rules for one storage tier.
//!
//! Every rebalancing decision goes through `TierLoad` so that all nodes of the cluster pick the
//! same owner: the lightest eligible contributor wins, ties go to the lowest address.

use std::collections::BTreeMap;

use corelib::NodeAddress;

/// Per-contributor bucket counts at one storage tier.
///
/// Backed by a `BTreeMap` so iteration is in address order, which is what makes the
/// tie-breaking deterministic.
#[derive(Debug, Clone)]
pub(crate) struct TierLoad {
    counts: BTreeMap<NodeAddress, usize>,
}

impl TierLoad {
    /// Count the slots each contributor holds in `slots`.
    ///
    /// Owners that are not contributors any more are ignored; callers release their slots
    /// before measuring.
    pub fn measure(contributors: &[NodeAddress], slots: &[Option<NodeAddress>]) -> Self {
        let mut counts: BTreeMap<NodeAddress, usize> =
            contributors.iter().map(|address| (*address, 0)).collect();
        for owner in slots.iter().flatten() {
            if let Some(count) = counts.get_mut(owner) {
                *count += 1;
            }
        }
        Self { counts }
    }

    pub fn count(&self, address: NodeAddress) -> usize {
        self.counts.get(&address).copied().unwrap_or(0)
    }

    /// Record that one slot moved from `from` to `to`.
    pub fn transfer(&mut self, from: Option<NodeAddress>, to: Option<NodeAddress>) {
        if let Some(count) = from.and_then(|address| self.counts.get_mut(&address)) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = to.and_then(|address| self.counts.get_mut(&address)) {
            *count += 1;
        }
    }

    /// The contributor holding the fewest slots among those accepted by `eligible`.
    ///
    /// `min_by_key` keeps the first minimum, and iteration is in address order, so ties go to
    /// the lowest address.
    pub fn lightest(&self, eligible: impl Fn(NodeAddress) -> bool) -> Option<NodeAddress> {
        self.counts
            .iter()
            .filter(|(address, _)| eligible(**address))
            .min_by_key(|(_, count)| **count)
            .map(|(address, _)| *address)
    }

    /// Contributors holding more than `quota` slots, heaviest first, ties by lowest address.
    pub fn donors_above(&self, quota: usize) -> Vec<NodeAddress> {
        let mut donors: Vec<(NodeAddress, usize)> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > quota)
            .map(|(address, count)| (*address, *count))
            .collect();
        donors.sort_by(|(left_address, left), (right_address, right)| {
            right.cmp(left).then(left_address.cmp(right_address))
        });
        donors.into_iter().map(|(address, _)| address).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(value: u128) -> NodeAddress {
        NodeAddress(value)
    }

    #[test]
    fn test_measure_ignores_strangers() {
        let slots = vec![Some(addr(1)), Some(addr(9)), None, Some(addr(1))];
        let load = TierLoad::measure(&[addr(1), addr(2)], &slots);
        assert_eq!(load.count(addr(1)), 2);
        assert_eq!(load.count(addr(2)), 0);
        assert_eq!(load.count(addr(9)), 0);
    }

    #[test]
    fn test_lightest_ties_go_to_lowest_address() {
        let slots = vec![Some(addr(5)), Some(addr(3))];
        let load = TierLoad::measure(&[addr(5), addr(3), addr(4)], &slots);
        assert_eq!(load.lightest(|_| true), Some(addr(4)));
        assert_eq!(load.lightest(|a| a != addr(4)), Some(addr(3)));
        assert_eq!(load.lightest(|_| false), None);
    }

    #[test]
    fn test_donors_order() {
        let slots = vec![Some(addr(2)), Some(addr(2)), Some(addr(1)), Some(addr(1)), Some(addr(3))];
        let load = TierLoad::measure(&[addr(1), addr(2), addr(3)], &slots);
        assert_eq!(load.donors_above(1), vec![addr(1), addr(2)]);
        assert!(load.donors_above(2).is_empty());
    }

    #[test]
    fn test_transfer() {
        let slots = vec![Some(addr(1))];
        let mut load = TierLoad::measure(&[addr(1), addr(2)], &slots);
        load.transfer(Some(addr(1)), Some(addr(2)));
        assert_eq!(load.count(addr(1)), 0);
        assert_eq!(load.count(addr(2)), 1);
    }
}
