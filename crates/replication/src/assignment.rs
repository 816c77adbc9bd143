//! Bucket ownership assignment.
//!
//! Maps every bucket, at every storage tier, to the partition contributor that owns it.
//! Storage number 0 holds the primary owners, storage numbers 1..=replica_count hold replica
//! owners.
//!
//! # Invariants
//!
//! - With at least one contributor, every bucket has an owner at storage number 0
//! - A replica slot is unowned only if there are fewer contributors than `replica_count + 1`
//! - No contributor owns the same bucket at two storage numbers
//!
//! # Algorithm
//!
//! Joining contributor (`add_bucket_owner`), for every storage tier in ascending order:
//!
//! 1. Hand unowned slots to the lightest eligible contributor
//! 2. Compute the quota `bucket_count / contributor_count`
//! 3. Move buckets from owners above quota to the newcomer until it reaches the quota,
//!    skipping buckets the newcomer already holds at another tier
//!
//! Departing contributors (`remove_bucket_owners`):
//!
//! 1. Release every slot held by a departing address, at every tier
//! 2. For every tier in ascending order, hand each released slot to the lightest eligible
//!    remaining contributor; ties go to the lowest address
//! 3. If nobody is eligible because every remaining contributor already holds a higher-tier
//!    replica of that bucket, promote that replica and refill its old slot when its tier is
//!    processed
//!
//! Slots held by surviving contributors never move on removal, except for the promotion in
//! step 3.
//!
//! # Performance
//!
//! - **Memory**: O(b * t) where b = buckets, t = storage tiers
//! - **Lookup**: O(1) per (storage number, bucket number)
//! - **Rebalancing**: O(t * b * m) for m moved buckets

use std::collections::{BTreeMap, BTreeSet};

use corelib::{BucketNumber, NodeAddress, StorageNumber};
use serde::{Deserialize, Serialize};

use crate::placement::TierLoad;

/// One slot of the ownership table that changed hands.
///
/// Returned by the mutators so that bucket transfer can be scheduled outside of command
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketReassignment {
    pub storage_number: StorageNumber,
    pub bucket_number: BucketNumber,
    /// Owner before the change, `None` if the slot was unowned.
    pub previous_owner: Option<NodeAddress>,
    /// Owner after the change, `None` if the slot became unowned.
    pub new_owner: Option<NodeAddress>,
}

/// Slots released during a rebalance, keyed by (storage number, bucket number).
type Released = BTreeMap<(StorageNumber, BucketNumber), NodeAddress>;

/// Table of bucket owners, `(replica_count + 1) x bucket_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOwnershipAssignment {
    bucket_count: u32,
    replica_count: u32,
    /// Owners indexed by `[storage_number][bucket_number]`.
    owners: Vec<Vec<Option<NodeAddress>>>,
    /// Partition contributors in the order they became bucket owners.
    contributors: Vec<NodeAddress>,
}

impl BucketOwnershipAssignment {
    /// Create an empty assignment over `bucket_count` buckets with `replica_count` replica tiers.
    pub fn new(bucket_count: u32, replica_count: u32) -> Self {
        let owners = (0..=replica_count).map(|_| vec![None; bucket_count as usize]).collect();
        Self {
            bucket_count,
            replica_count,
            owners,
            contributors: Vec::new(),
        }
    }

    /// The zero-bucket assignment a group carries before its partition is configured.
    pub fn unconfigured() -> Self {
        Self::new(0, 0)
    }

    #[inline]
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    #[inline]
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Number of storage tiers, primary included.
    #[inline]
    pub fn storage_count(&self) -> u32 {
        self.replica_count + 1
    }

    /// Number of partition contributors currently owning buckets.
    pub fn bucket_owner_count(&self) -> usize {
        self.contributors.len()
    }

    /// Partition contributors in the order they became bucket owners.
    pub fn partition_contributors_addresses(&self) -> &[NodeAddress] {
        &self.contributors
    }

    pub fn is_bucket_owner(&self, address: NodeAddress) -> bool {
        self.contributors.contains(&address)
    }

    /// Owner of a bucket at a storage tier, `None` if unowned or out of range.
    pub fn bucket_owner_address(
        &self,
        storage_number: StorageNumber,
        bucket_number: BucketNumber,
    ) -> Option<NodeAddress> {
        self.owners
            .get(storage_number as usize)?
            .get(bucket_number as usize)
            .copied()
            .flatten()
    }

    /// Owners of all buckets at a storage tier, indexed by bucket number.
    ///
    /// Empty for a storage number beyond the replica count.
    pub fn bucket_owners_addresses(&self, storage_number: StorageNumber) -> &[Option<NodeAddress>] {
        self.owners
            .get(storage_number as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Buckets owned by `address` at a storage tier, ascending.
    pub fn owned_buckets(
        &self,
        storage_number: StorageNumber,
        address: NodeAddress,
    ) -> Vec<BucketNumber> {
        self.bucket_owners_addresses(storage_number)
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == Some(address))
            .map(|(bucket_number, _)| bucket_number as BucketNumber)
            .collect()
    }

    /// Number of buckets owned by `address` at a storage tier.
    pub fn owned_bucket_count(&self, storage_number: StorageNumber, address: NodeAddress) -> usize {
        self.bucket_owners_addresses(storage_number)
            .iter()
            .filter(|owner| **owner == Some(address))
            .count()
    }

    /// Register a joining partition contributor and move buckets to it.
    ///
    /// Adding an address that already owns buckets is a no-op.
    pub fn add_bucket_owner(&mut self, address: NodeAddress) -> Vec<BucketReassignment> {
        if self.contributors.contains(&address) {
            tracing::debug!(%address, "address is already a bucket owner");
            return Vec::new();
        }
        self.contributors.push(address);

        let mut changes = Vec::new();
        let mut released = Released::new();
        for storage_number in 0..self.storage_count() {
            self.fill_unowned(storage_number, &mut released, &mut changes);
            self.rebalance_towards(storage_number, address, &mut changes);
        }
        tracing::debug!(
            %address,
            moved = changes.len(),
            owners = self.contributors.len(),
            "added bucket owner"
        );
        changes
    }

    /// Remove a batch of departed contributors and reassign their buckets in one pass.
    ///
    /// Addresses that do not own buckets are ignored.
    pub fn remove_bucket_owners(&mut self, addresses: &[NodeAddress]) -> Vec<BucketReassignment> {
        let departing: BTreeSet<NodeAddress> = addresses
            .iter()
            .copied()
            .filter(|address| self.contributors.contains(address))
            .collect();
        if departing.is_empty() {
            return Vec::new();
        }
        self.contributors.retain(|address| !departing.contains(address));

        let mut released = Released::new();
        for (storage_number, slots) in self.owners.iter_mut().enumerate() {
            for (bucket_number, slot) in slots.iter_mut().enumerate() {
                if let Some(owner) = *slot {
                    if departing.contains(&owner) {
                        *slot = None;
                        let tier = storage_number as StorageNumber;
                        released.insert((tier, bucket_number as BucketNumber), owner);
                    }
                }
            }
        }

        let mut changes = Vec::new();
        for storage_number in 0..self.storage_count() {
            self.fill_unowned(storage_number, &mut released, &mut changes);
        }
        tracing::debug!(
            removed = departing.len(),
            moved = changes.len(),
            owners = self.contributors.len(),
            "removed bucket owners"
        );
        changes
    }

    /// True if `address` owns `bucket_number` at a tier other than `storage_number`.
    fn holds_elsewhere(
        &self,
        address: NodeAddress,
        storage_number: StorageNumber,
        bucket_number: BucketNumber,
    ) -> bool {
        let bucket = bucket_number as usize;
        self.owners.iter().enumerate().any(|(tier, slots)| {
            tier as StorageNumber != storage_number && slots[bucket] == Some(address)
        })
    }

    /// Give every unowned slot of a tier to the lightest eligible contributor.
    fn fill_unowned(
        &mut self,
        storage_number: StorageNumber,
        released: &mut Released,
        changes: &mut Vec<BucketReassignment>,
    ) {
        let tier = storage_number as usize;
        let mut load = TierLoad::measure(&self.contributors, &self.owners[tier]);
        for bucket_number in 0..self.bucket_count {
            if self.owners[tier][bucket_number as usize].is_some() {
                continue;
            }
            let lightest = load.lightest(|candidate| {
                !self.holds_elsewhere(candidate, storage_number, bucket_number)
            });
            let new_owner = match lightest {
                Some(owner) => Some(owner),
                None => self.promote_replica(storage_number, bucket_number, released),
            };
            let previous_owner = released.remove(&(storage_number, bucket_number));
            self.owners[tier][bucket_number as usize] = new_owner;
            load.transfer(None, new_owner);
            if previous_owner.is_some() || new_owner.is_some() {
                tracing::trace!(
                    storage_number,
                    bucket_number,
                    ?previous_owner,
                    ?new_owner,
                    "bucket reassigned"
                );
                changes.push(BucketReassignment {
                    storage_number,
                    bucket_number,
                    previous_owner,
                    new_owner,
                });
            }
        }
    }

    /// Move the lowest-tier replica of a bucket above `storage_number` down into it.
    ///
    /// The vacated slot is recorded in `released` and refilled when its tier is processed.
    fn promote_replica(
        &mut self,
        storage_number: StorageNumber,
        bucket_number: BucketNumber,
        released: &mut Released,
    ) -> Option<NodeAddress> {
        let bucket = bucket_number as usize;
        let source = ((storage_number + 1)..self.storage_count())
            .find(|tier| self.owners[*tier as usize][bucket].is_some())?;
        let holder = self.owners[source as usize][bucket].take()?;
        released.insert((source, bucket_number), holder);
        tracing::trace!(
            bucket_number,
            from = source,
            to = storage_number,
            address = %holder,
            "replica promoted"
        );
        Some(holder)
    }

    /// Move buckets from owners above quota to `newcomer` until it reaches the quota.
    fn rebalance_towards(
        &mut self,
        storage_number: StorageNumber,
        newcomer: NodeAddress,
        changes: &mut Vec<BucketReassignment>,
    ) {
        if self.contributors.is_empty() {
            return;
        }
        let quota = self.bucket_count as usize / self.contributors.len();
        let tier = storage_number as usize;
        let mut load = TierLoad::measure(&self.contributors, &self.owners[tier]);
        while load.count(newcomer) < quota {
            let donation = load
                .donors_above(quota)
                .into_iter()
                .filter(|donor| *donor != newcomer)
                .find_map(|donor| {
                    self.movable_bucket(storage_number, donor, newcomer)
                        .map(|bucket| (donor, bucket))
                });
            let Some((donor, bucket_number)) = donation else {
                break;
            };
            self.owners[tier][bucket_number as usize] = Some(newcomer);
            load.transfer(Some(donor), Some(newcomer));
            changes.push(BucketReassignment {
                storage_number,
                bucket_number,
                previous_owner: Some(donor),
                new_owner: Some(newcomer),
            });
        }
    }

    /// Highest-numbered bucket `donor` owns at a tier that `newcomer` may take over.
    fn movable_bucket(
        &self,
        storage_number: StorageNumber,
        donor: NodeAddress,
        newcomer: NodeAddress,
    ) -> Option<BucketNumber> {
        let slots = &self.owners[storage_number as usize];
        (0..self.bucket_count).rev().find(|bucket_number| {
            slots[*bucket_number as usize] == Some(donor)
                && !self.holds_elsewhere(newcomer, storage_number, *bucket_number)
        })
    }
}

impl Default for BucketOwnershipAssignment {
    fn default() -> Self {
        Self::unconfigured()
    }
}
