//! Property tests for the bucket ownership table.
//!
//! # Test Strategy
//!
//! 1. **Coverage**: every bucket has a primary while a contributor remains
//! 2. **No dual ownership**: a contributor never holds one bucket at two tiers
//! 3. **Replica fill**: replica slots are unowned only with too few contributors
//! 4. **Minimal movement**: survivors keep their primaries when others leave

use std::collections::HashSet;

use corelib::NodeAddress;
use proptest::prelude::*;
use replication::BucketOwnershipAssignment;

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(Vec<u8>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..6).prop_map(Op::Join),
        2 => prop::collection::vec(0u8..6, 1..3).prop_map(Op::Leave),
    ]
}

fn addr(value: u8) -> NodeAddress {
    NodeAddress(u128::from(value) + 1)
}

fn check_invariants(assignment: &BucketOwnershipAssignment) -> Result<(), TestCaseError> {
    let contributors: HashSet<NodeAddress> =
        assignment.partition_contributors_addresses().iter().copied().collect();

    for bucket in 0..assignment.bucket_count() {
        let mut seen = HashSet::new();
        for storage in 0..assignment.storage_count() {
            let owner = assignment.bucket_owner_address(storage, bucket);
            match owner {
                Some(owner) => {
                    prop_assert!(
                        contributors.contains(&owner),
                        "owner {} is not a contributor",
                        owner
                    );
                    prop_assert!(seen.insert(owner), "{} owns bucket {} twice", owner, bucket);
                }
                None => {
                    if storage == 0 {
                        prop_assert!(contributors.is_empty(), "bucket {} has no primary", bucket);
                    } else {
                        prop_assert!(
                            contributors.len() < assignment.storage_count() as usize,
                            "replica {} of bucket {} unowned with {} contributors",
                            storage,
                            bucket,
                            contributors.len()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Invariant Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_invariants_hold_under_churn(
        bucket_count in 1u32..40,
        replica_count in 0u32..3,
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let mut assignment = BucketOwnershipAssignment::new(bucket_count, replica_count);
        for op in ops {
            match op {
                Op::Join(node) => {
                    assignment.add_bucket_owner(addr(node));
                }
                Op::Leave(nodes) => {
                    let addresses: Vec<NodeAddress> = nodes.into_iter().map(addr).collect();
                    assignment.remove_bucket_owners(&addresses);
                }
            }
            check_invariants(&assignment)?;
        }
    }

    #[test]
    fn prop_survivors_keep_primaries(
        bucket_count in 1u32..40,
        replica_count in 0u32..3,
        joins in prop::collection::vec(0u8..6, 1..8),
        leavers in prop::collection::vec(0u8..6, 1..3),
    ) {
        let mut assignment = BucketOwnershipAssignment::new(bucket_count, replica_count);
        for node in joins {
            assignment.add_bucket_owner(addr(node));
        }
        let leaving: HashSet<NodeAddress> = leavers.iter().copied().map(addr).collect();
        let before: Vec<Option<NodeAddress>> = assignment.bucket_owners_addresses(0).to_vec();

        let addresses: Vec<NodeAddress> = leaving.iter().copied().collect();
        let changes = assignment.remove_bucket_owners(&addresses);

        for (bucket, owner) in before.iter().enumerate() {
            if let Some(owner) = owner {
                if !leaving.contains(owner) {
                    let current = assignment.bucket_owner_address(0, bucket as u32);
                    prop_assert_eq!(current, Some(*owner));
                }
            }
        }
        for change in changes.iter().filter(|change| change.storage_number == 0) {
            prop_assert!(change.previous_owner.map_or(false, |owner| leaving.contains(&owner)));
        }
    }

    #[test]
    fn prop_join_order_independent_bucket_counts(
        bucket_count in 1u32..64,
        count in 1u8..6,
    ) {
        // Every contributor ends up with floor or ceil of its fair share of primaries
        let mut assignment = BucketOwnershipAssignment::new(bucket_count, 0);
        for node in 0..count {
            assignment.add_bucket_owner(addr(node));
        }
        let fair = bucket_count as usize / count as usize;
        for node in 0..count {
            let owned = assignment.owned_bucket_count(0, addr(node));
            prop_assert!(owned >= fair, "node {} owns {} < {}", node, owned, fair);
        }
    }
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[test]
fn test_orders_scenario_ownership() {
    let node_a = NodeAddress(0xA);
    let node_c = NodeAddress(0xC);
    let mut assignment = BucketOwnershipAssignment::new(4, 0);

    assignment.add_bucket_owner(node_a);
    assert_eq!(assignment.owned_bucket_count(0, node_a), 4);

    assignment.add_bucket_owner(node_c);
    assert_eq!(assignment.owned_bucket_count(0, node_a), 2);
    assert_eq!(assignment.owned_bucket_count(0, node_c), 2);

    assignment.remove_bucket_owners(&[node_a]);
    assert_eq!(assignment.owned_buckets(0, node_c), vec![0, 1, 2, 3]);
}

#[test]
fn test_rejoin_after_leave() {
    let node = NodeAddress(7);
    let mut assignment = BucketOwnershipAssignment::new(4, 0);
    assignment.add_bucket_owner(node);
    assignment.remove_bucket_owners(&[node]);
    assignment.add_bucket_owner(node);

    assert_eq!(assignment.owned_bucket_count(0, node), 4);
}
