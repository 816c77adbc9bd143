//! The replicated state of one cache group.
//!
//! Every node holds its own copy of each group and mutates it only from the command-processing
//! context. Copies stay identical because all nodes apply the same commands in the same order.
//!
//! Mutators validate first and mutate second: a returned error means the group is unchanged.
//! Events produced by a mutation are queued on the group and handed to local subscribers by the
//! dispatcher after the group lock is released.

use std::fmt;

use corelib::{BucketNumber, Error, NodeAddress, Result, StorageNumber, MAX_REPLICA_COUNT};
use replication::{BucketOwnershipAssignment, BucketReassignment};
use serde::{Deserialize, Serialize};

use crate::commands::BucketKeys;
use crate::events::{GroupEvent, GroupMemberJoinedEvent, GroupMemberLeftEvent, SubscriptionEvent};
use crate::member::GroupMember;
use crate::subscription::{SubscriberId, Subscription, SubscriptionRegistry};

/// Kind of group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupType {
    Unknown,
    Cache,
}

impl GroupType {
    /// Map the wire code of a group type. Unrecognized codes are `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => GroupType::Cache,
            _ => GroupType::Unknown,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            GroupType::Unknown => 0,
            GroupType::Cache => 1,
        }
    }
}

/// Identity of a group: its type and name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub group_type: GroupType,
    pub name: String,
}

impl GroupKey {
    pub fn new(group_type: GroupType, name: impl Into<String>) -> Self {
        Self {
            group_type,
            name: name.into(),
        }
    }

    /// Key of a cache group.
    pub fn cache(name: impl Into<String>) -> Self {
        Self::new(GroupType::Cache, name)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group_type {
            GroupType::Cache => write!(f, "cache:{}", self.name),
            GroupType::Unknown => write!(f, "unknown:{}", self.name),
        }
    }
}

/// Partition policy of a group, set once by its first contributor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    pub replica_count: u32,
    pub partition_size_bytes: i64,
    pub max_elements: i64,
}

impl PartitionConfiguration {
    /// Validate a requested partition policy.
    pub fn new(replica_count: i32, partition_size_bytes: i64, max_elements: i64) -> Result<Self> {
        let replica_count = u32::try_from(replica_count)
            .ok()
            .filter(|count| *count <= MAX_REPLICA_COUNT)
            .ok_or(Error::InvalidReplicaCount(replica_count))?;
        if partition_size_bytes <= 0 {
            return Err(Error::InvalidPartitionSize(partition_size_bytes));
        }
        Ok(Self {
            replica_count,
            partition_size_bytes,
            max_elements,
        })
    }
}

/// Replicated state of one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    key: GroupKey,
    /// Incremented on every change of the member list, never reset.
    version: u64,
    members: Vec<GroupMember>,
    /// Cluster-wide bucket count the partition gets when configured.
    bucket_count: u32,
    partition: Option<PartitionConfiguration>,
    bucket_ownership: BucketOwnershipAssignment,
    subscriptions: SubscriptionRegistry,
    #[serde(skip)]
    pending_events: Vec<GroupEvent>,
}

impl Group {
    /// Create an empty, unconfigured group.
    pub fn new(key: GroupKey, bucket_count: u32) -> Self {
        Self {
            key,
            version: 0,
            members: Vec::new(),
            bucket_count,
            partition: None,
            bucket_ownership: BucketOwnershipAssignment::unconfigured(),
            subscriptions: SubscriptionRegistry::new(),
            pending_events: Vec::new(),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn group_type(&self) -> GroupType {
        self.key.group_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every member that ever joined, in join order, active or not.
    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    pub fn member(&self, address: NodeAddress) -> Option<&GroupMember> {
        self.members.iter().find(|member| member.address() == address)
    }

    pub fn active_members(&self) -> impl Iterator<Item = &GroupMember> {
        self.members.iter().filter(|member| member.is_active())
    }

    pub fn is_active_member(&self, address: NodeAddress) -> bool {
        self.member(address).map_or(false, GroupMember::is_active)
    }

    /// Active members that contribute storage.
    pub fn partition_contributors(&self) -> impl Iterator<Item = &GroupMember> {
        self.active_members().filter(|member| member.is_partition_contributor())
    }

    pub fn is_partition_configured(&self) -> bool {
        self.partition.is_some()
    }

    pub fn partition_configuration(&self) -> Option<&PartitionConfiguration> {
        self.partition.as_ref()
    }

    /// Replica count, 0 before configuration.
    pub fn replica_count(&self) -> u32 {
        self.partition.map_or(0, |partition| partition.replica_count)
    }

    /// Partition size, 0 before configuration.
    pub fn partition_size_bytes(&self) -> i64 {
        self.partition.map_or(0, |partition| partition.partition_size_bytes)
    }

    /// Max elements, 0 before configuration.
    pub fn max_elements(&self) -> i64 {
        self.partition.map_or(0, |partition| partition.max_elements)
    }

    /// Bucket count the partition uses once configured.
    pub fn configured_bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn bucket_ownership(&self) -> &BucketOwnershipAssignment {
        &self.bucket_ownership
    }

    pub fn bucket_owner(
        &self,
        storage_number: StorageNumber,
        bucket_number: BucketNumber,
    ) -> Option<NodeAddress> {
        self.bucket_ownership.bucket_owner_address(storage_number, bucket_number)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Set the partition policy. Allowed exactly once.
    ///
    /// Allocates the real ownership table with the cluster-wide bucket count.
    pub fn configure_partition(
        &mut self,
        replica_count: i32,
        partition_size_bytes: i64,
        max_elements: i64,
    ) -> Result<()> {
        if self.partition.is_some() {
            return Err(Error::PartitionAlreadyConfigured { group: self.key.to_string() });
        }
        let partition =
            PartitionConfiguration::new(replica_count, partition_size_bytes, max_elements)?;
        self.bucket_ownership =
            BucketOwnershipAssignment::new(self.bucket_count, partition.replica_count);
        self.partition = Some(partition);
        tracing::info!(
            group = %self.key,
            replica_count = partition.replica_count,
            partition_size_bytes,
            max_elements,
            bucket_count = self.bucket_count,
            "partition configured"
        );
        Ok(())
    }

    /// Check the member-level preconditions of `add_member`: the address is not active and a
    /// contributor brings a positive heap.
    pub fn check_admissible(&self, member: &GroupMember) -> Result<()> {
        if self.is_active_member(member.address()) {
            return Err(Error::MemberAlreadyActive {
                group: self.key.to_string(),
                address: member.address(),
            });
        }
        member.validate()
    }

    /// Add a new member or re-activate an inactive one.
    ///
    /// A first join bumps the version, a re-join reuses the record without bumping it.
    /// Contributors become bucket owners.
    pub fn add_member(&mut self, member: GroupMember) -> Result<Vec<BucketReassignment>> {
        self.check_admissible(&member)?;
        if member.is_partition_contributor() && self.partition.is_none() {
            return Err(Error::PartitionNotConfigured { group: self.key.to_string() });
        }

        let address = member.address();
        let index = match self.members.iter().position(|existing| existing.address() == address) {
            Some(index) => {
                self.members[index] = member;
                index
            }
            None => {
                self.members.push(member);
                self.version += 1;
                self.members.len() - 1
            }
        };
        self.members[index].activate();

        let joined = self.members[index].clone();
        tracing::info!(
            group = %self.key,
            %address,
            contributor = joined.is_partition_contributor(),
            version = self.version,
            "member joined"
        );
        self.pending_events.push(GroupEvent::MemberJoined(GroupMemberJoinedEvent {
            group: self.key.clone(),
            member: joined.clone(),
            version: self.version,
        }));

        if joined.is_partition_contributor() {
            return Ok(self.bucket_ownership.add_bucket_owner(address));
        }
        Ok(Vec::new())
    }

    /// Remove a batch of departed nodes.
    ///
    /// Addresses without an active record are skipped. Subscriptions held by departed nodes are
    /// purged, and the buckets of departed contributors are reassigned in one pass.
    pub fn remove_members(&mut self, addresses: &[NodeAddress]) -> Vec<BucketReassignment> {
        let mut departed_contributors = Vec::new();

        for address in addresses {
            let Some(member) = self
                .members
                .iter_mut()
                .find(|member| member.address() == *address && member.is_active())
            else {
                tracing::debug!(group = %self.key, %address, "no active member to remove");
                continue;
            };
            member.deactivate();
            let left = member.clone();
            self.version += 1;
            tracing::info!(group = %self.key, %address, version = self.version, "member left");
            if left.is_partition_contributor() {
                departed_contributors.push(*address);
            }
            self.pending_events.push(GroupEvent::MemberLeft(GroupMemberLeftEvent {
                group: self.key.clone(),
                member: left,
                version: self.version,
            }));

            let purged = self.subscriptions.remove_subscriber_address(*address);
            for (bucket_number, key, subscription) in purged {
                self.pending_events.push(GroupEvent::SubscriptionRemoved(SubscriptionEvent {
                    bucket_number,
                    key,
                    subscription,
                }));
            }
        }

        if departed_contributors.is_empty() {
            return Vec::new();
        }
        self.bucket_ownership.remove_bucket_owners(&departed_contributors)
    }

    /// Set the leaving flag of an active member. Returns `false` if there is none.
    pub fn mark_leaving(&mut self, address: NodeAddress) -> bool {
        let active = self
            .members
            .iter_mut()
            .find(|member| member.address() == address && member.is_active());
        match active {
            Some(member) => {
                member.mark_leaving();
                tracing::info!(group = %self.key, %address, "member is leaving");
                true
            }
            None => false,
        }
    }

    /// Register `subscription` for every key, bucket by bucket.
    ///
    /// Returns the number of new registrations. Duplicates are skipped.
    pub fn add_subscriptions(
        &mut self,
        keys: &BucketKeys,
        subscription: &Subscription,
    ) -> Result<usize> {
        self.check_buckets(keys)?;

        let mut added = 0;
        for (bucket_number, bucket_keys) in keys {
            for key in bucket_keys {
                if !self.subscriptions.insert(*bucket_number, key.clone(), subscription.clone()) {
                    tracing::debug!(
                        group = %self.key,
                        bucket_number,
                        %key,
                        subscriber = ?subscription.subscriber,
                        "duplicate subscription ignored"
                    );
                    continue;
                }
                added += 1;
                self.pending_events.push(GroupEvent::SubscriptionAdded(SubscriptionEvent {
                    bucket_number: *bucket_number,
                    key: key.clone(),
                    subscription: subscription.clone(),
                }));
            }
        }
        Ok(added)
    }

    /// Remove the registrations of `subscriber` for every key, bucket by bucket.
    ///
    /// Returns the number of removed registrations. Missing ones are skipped.
    pub fn remove_subscriptions(
        &mut self,
        keys: &BucketKeys,
        subscriber: SubscriberId,
    ) -> Result<usize> {
        self.check_buckets(keys)?;

        let mut removed = 0;
        for (bucket_number, bucket_keys) in keys {
            for key in bucket_keys {
                let existing = self.subscriptions.remove(*bucket_number, key, subscriber);
                let Some(subscription) = existing else {
                    continue;
                };
                removed += 1;
                self.pending_events.push(GroupEvent::SubscriptionRemoved(SubscriptionEvent {
                    bucket_number: *bucket_number,
                    key: key.clone(),
                    subscription,
                }));
            }
        }
        Ok(removed)
    }

    /// Take the events queued by the mutations applied so far.
    pub fn take_events(&mut self) -> Vec<GroupEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn check_buckets(&self, keys: &BucketKeys) -> Result<()> {
        match keys.keys().find(|bucket| **bucket >= self.bucket_count) {
            Some(bucket) => Err(Error::InvalidBucket {
                bucket: *bucket,
                bucket_count: self.bucket_count,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Group {
        Group::new(GroupKey::cache("orders"), 4)
    }

    fn contributor(address: u128, heap: i64) -> GroupMember {
        GroupMember::new(NodeAddress(address), true, heap, "orders")
    }

    #[test]
    fn test_new_group_is_unconfigured() {
        let group = orders();
        assert!(!group.is_partition_configured());
        assert_eq!(group.replica_count(), 0);
        assert_eq!(group.partition_size_bytes(), 0);
        assert_eq!(group.max_elements(), 0);
        assert_eq!(group.bucket_ownership().bucket_count(), 0);
        assert_eq!(group.version(), 0);
    }

    #[test]
    fn test_configure_once() {
        let mut group = orders();
        group.configure_partition(1, 500, 10).unwrap();
        assert!(group.is_partition_configured());
        assert_eq!(group.bucket_ownership().bucket_count(), 4);
        assert_eq!(group.bucket_ownership().replica_count(), 1);

        // Identical arguments still fail the second time
        let err = group.configure_partition(1, 500, 10).unwrap_err();
        assert_eq!(err, Error::PartitionAlreadyConfigured { group: "cache:orders".into() });
    }

    #[test]
    fn test_configure_rejects_bad_values() {
        let mut group = orders();
        assert_eq!(group.configure_partition(-1, 500, 0), Err(Error::InvalidReplicaCount(-1)));
        assert_eq!(group.configure_partition(7, 500, 0), Err(Error::InvalidReplicaCount(7)));
        assert_eq!(
            group.configure_partition(i32::MAX, 500, 0),
            Err(Error::InvalidReplicaCount(i32::MAX))
        );
        assert_eq!(group.configure_partition(0, 0, 0), Err(Error::InvalidPartitionSize(0)));
        assert!(!group.is_partition_configured());
    }

    #[test]
    fn test_add_member_bumps_version() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();

        assert_eq!(group.version(), 1);
        assert!(group.is_active_member(NodeAddress(1)));
        assert_eq!(group.take_events().len(), 1);
    }

    #[test]
    fn test_rejoin_reuses_record_without_bump() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        group.remove_members(&[NodeAddress(1)]);
        assert_eq!(group.version(), 2);

        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        assert_eq!(group.version(), 2);
        assert_eq!(group.members().len(), 1);
        assert!(group.is_active_member(NodeAddress(1)));
    }

    #[test]
    fn test_reactivating_active_member_fails() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        let err = group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap_err();
        assert!(matches!(err, Error::MemberAlreadyActive { .. }));
        assert_eq!(group.version(), 1);
    }

    #[test]
    fn test_contributor_requires_configuration() {
        let mut group = orders();
        let err = group.add_member(contributor(1, 1_000)).unwrap_err();
        assert!(matches!(err, Error::PartitionNotConfigured { .. }));
        assert!(group.members().is_empty());
    }

    #[test]
    fn test_contributor_requires_heap() {
        let mut group = orders();
        group.configure_partition(0, 500, 0).unwrap();
        let err = group.add_member(contributor(1, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidHeapSize { .. }));
    }

    #[test]
    fn test_contributor_owns_buckets() {
        let mut group = orders();
        group.configure_partition(0, 500, 0).unwrap();
        let changes = group.add_member(contributor(1, 1_000)).unwrap();

        assert_eq!(changes.len(), 4);
        for bucket in 0..4 {
            assert_eq!(group.bucket_owner(0, bucket), Some(NodeAddress(1)));
        }
        assert_eq!(group.partition_contributors().count(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        group.take_events();

        let changes = group.remove_members(&[NodeAddress(9)]);
        assert!(changes.is_empty());
        assert_eq!(group.version(), 1);
        assert!(group.take_events().is_empty());
    }

    #[test]
    fn test_remove_clears_leaving() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        assert!(group.mark_leaving(NodeAddress(1)));
        assert!(group.member(NodeAddress(1)).unwrap().is_leaving());

        group.remove_members(&[NodeAddress(1)]);
        let member = group.member(NodeAddress(1)).unwrap();
        assert!(!member.is_active());
        assert!(!member.is_leaving());
        assert!(!group.mark_leaving(NodeAddress(1)));
    }

    #[test]
    fn test_subscription_bucket_range() {
        let mut group = orders();
        let mut keys = BucketKeys::new();
        keys.entry(4).or_default().insert("k".into());
        let subscription = Subscription::new(SubscriberId::new(NodeAddress(1), 1));

        let err = group.add_subscriptions(&keys, &subscription).unwrap_err();
        assert_eq!(err, Error::InvalidBucket { bucket: 4, bucket_count: 4 });
        assert!(group.subscriptions().is_empty());
    }

    #[test]
    fn test_removal_purges_subscriptions() {
        let mut group = orders();
        group.add_member(GroupMember::client(NodeAddress(1), "orders")).unwrap();
        let mut keys = BucketKeys::new();
        keys.entry(0).or_default().insert("a".into());
        keys.entry(2).or_default().insert("b".into());
        let subscription = Subscription::new(SubscriberId::new(NodeAddress(1), 1));
        assert_eq!(group.add_subscriptions(&keys, &subscription).unwrap(), 2);
        group.take_events();

        group.remove_members(&[NodeAddress(1)]);

        assert!(group.subscriptions().is_empty());
        let removed = group
            .take_events()
            .into_iter()
            .filter(|event| matches!(event, GroupEvent::SubscriptionRemoved(_)))
            .count();
        assert_eq!(removed, 2);
    }

    #[test]
    fn test_max_replica_count_accepted() {
        let mut group = orders();
        group.configure_partition(MAX_REPLICA_COUNT as i32, 500, 0).unwrap();
        assert_eq!(group.bucket_ownership().storage_count(), MAX_REPLICA_COUNT + 1);
    }

    #[test]
    fn test_batch_removal_interleaves_purge() {
        let mut group = orders();
        let subscription =
            |address: u128| Subscription::new(SubscriberId::new(NodeAddress(address), 1));
        let mut keys = BucketKeys::new();
        keys.entry(0).or_default().insert("k".into());
        for address in [1, 2] {
            group.add_member(GroupMember::client(NodeAddress(address), "orders")).unwrap();
            group.add_subscriptions(&keys, &subscription(address)).unwrap();
        }
        group.take_events();

        group.remove_members(&[NodeAddress(1), NodeAddress(2)]);

        let order: Vec<(&str, NodeAddress)> = group
            .take_events()
            .iter()
            .map(|event| match event {
                GroupEvent::MemberLeft(event) => ("left", event.member.address()),
                GroupEvent::SubscriptionRemoved(event) => {
                    ("unsubscribed", event.subscription.address())
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("left", NodeAddress(1)),
                ("unsubscribed", NodeAddress(1)),
                ("left", NodeAddress(2)),
                ("unsubscribed", NodeAddress(2)),
            ]
        );
    }

    #[test]
    fn test_group_type_codes() {
        assert_eq!(GroupType::from_code(1), GroupType::Cache);
        assert_eq!(GroupType::from_code(7), GroupType::Unknown);
        assert_eq!(GroupType::Cache.code(), 1);
    }
}
