//! Node-local table of replicated groups.
//!
//! One `GroupRegistry` exists per cluster node process. It is created at startup, handed to the
//! command processor, and torn down at shutdown. Several registries can live in one process,
//! which is how tests simulate a cluster.
//!
//! # Concurrency Model
//!
//! - Groups are only mutated by the command processor, under the group's write lock
//! - Any thread may read a group under its read lock, concurrently with other readers
//! - Local subscriber lists are not replicated and can be changed at any time

use std::sync::Arc;

use corelib::{Error, Result, BUCKET_COUNT};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{
    EntryEventSubscriptionConfigurationSubscriber, EntrySubscriptionSubscriberList, GroupEvent,
    GroupEventSubscriber, GroupEventSubscriberList,
};
use crate::group::{Group, GroupKey};

/// Shared handle to one replicated group.
pub type GroupHandle = Arc<RwLock<Group>>;

/// Full copy of a node's replicated groups, for bulk state transfer to a joining node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub bucket_count: u32,
    /// Groups ordered by key.
    pub groups: Vec<Group>,
}

/// Table of groups keyed by (group type, group name).
pub struct GroupRegistry {
    bucket_count: u32,
    groups: DashMap<GroupKey, GroupHandle>,
    group_subscribers: DashMap<GroupKey, Arc<GroupEventSubscriberList>>,
    entry_subscribers: DashMap<GroupKey, Arc<EntrySubscriptionSubscriberList>>,
}

impl GroupRegistry {
    /// Create a registry whose groups are partitioned into `bucket_count` buckets.
    pub fn new(bucket_count: u32) -> Self {
        Self {
            bucket_count,
            groups: DashMap::new(),
            group_subscribers: DashMap::new(),
            entry_subscribers: DashMap::new(),
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn group(&self, key: &GroupKey) -> Option<GroupHandle> {
        self.groups.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Look a group up, creating it unconfigured if absent. The flag tells whether it was created.
    pub fn get_or_create_group(&self, key: &GroupKey) -> (GroupHandle, bool) {
        if let Some(group) = self.group(key) {
            return (group, false);
        }
        let mut created = false;
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(Group::new(key.clone(), self.bucket_count)))
            })
            .value()
            .clone();
        if created {
            tracing::info!(group = %key, "group created");
        }
        (group, created)
    }

    /// Keys of all groups, sorted.
    pub fn group_keys(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Subscribers to membership events of a group. The group does not need to exist yet.
    pub fn group_event_subscribers(&self, key: &GroupKey) -> Arc<GroupEventSubscriberList> {
        self.group_subscribers.entry(key.clone()).or_insert_with(Default::default).value().clone()
    }

    /// Subscribers to subscription configuration events of a group.
    pub fn entry_subscription_subscribers(
        &self,
        key: &GroupKey,
    ) -> Arc<EntrySubscriptionSubscriberList> {
        self.entry_subscribers.entry(key.clone()).or_insert_with(Default::default).value().clone()
    }

    pub fn subscribe_group_events(
        &self,
        key: &GroupKey,
        subscriber: Arc<dyn GroupEventSubscriber>,
    ) {
        self.group_event_subscribers(key).subscribe(subscriber);
    }

    pub fn subscribe_entry_subscription_events(
        &self,
        key: &GroupKey,
        subscriber: Arc<dyn EntryEventSubscriptionConfigurationSubscriber>,
    ) {
        self.entry_subscription_subscribers(key).subscribe(subscriber);
    }

    /// Deliver events to the local subscribers of a group, in order.
    ///
    /// Must not be called while holding the group's lock: subscribers may read the group.
    pub fn publish(&self, key: &GroupKey, events: &[GroupEvent]) {
        if events.is_empty() {
            return;
        }
        let group_subscribers =
            self.group_subscribers.get(key).map(|entry| Arc::clone(entry.value()));
        let entry_subscribers =
            self.entry_subscribers.get(key).map(|entry| Arc::clone(entry.value()));
        for event in events {
            if let Some(subscribers) = &group_subscribers {
                subscribers.notify(event);
            }
            if let Some(subscribers) = &entry_subscribers {
                subscribers.notify(event);
            }
        }
    }

    /// Copy every group for bulk state transfer.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let groups = self
            .group_keys()
            .iter()
            .filter_map(|key| self.group(key))
            .map(|group| {
                let mut copy = group.read().clone();
                copy.take_events();
                copy
            })
            .collect();
        RegistrySnapshot {
            bucket_count: self.bucket_count,
            groups,
        }
    }

    /// Replace every group with the content of a snapshot. Local subscribers are kept.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> Result<()> {
        if snapshot.bucket_count != self.bucket_count {
            return Err(Error::BucketCountMismatch {
                snapshot: snapshot.bucket_count,
                local: self.bucket_count,
            });
        }
        self.groups.clear();
        for mut group in snapshot.groups {
            group.take_events();
            self.groups.insert(group.key().clone(), Arc::new(RwLock::new(group)));
        }
        tracing::info!(groups = self.groups.len(), "replicated state restored from snapshot");
        Ok(())
    }

    /// Drop all groups and local subscribers.
    pub fn shutdown(&self) {
        let groups = self.groups.len();
        self.groups.clear();
        self.group_subscribers.clear();
        self.entry_subscribers.clear();
        tracing::info!(groups, "group registry shut down");
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(BUCKET_COUNT)
    }
}
