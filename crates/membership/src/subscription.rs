//! Entry-modified subscriptions.
//!
//! Subscriptions are replicated with the group. They are stored in one flat table keyed by
//! `(bucket, key, subscriber)`: a key with no subscribers simply has no rows, so there are no
//! inner collections to prune.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use corelib::{BucketNumber, CacheKey, NodeAddress};
use serde::{Deserialize, Serialize};

/// Identity of a subscriber: the node it lives on plus a token unique on that node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId {
    pub address: NodeAddress,
    pub identity: u64,
}

impl SubscriberId {
    /// The smallest identity, used as a range bound.
    pub const MIN: SubscriberId = SubscriberId {
        address: NodeAddress::MIN,
        identity: 0,
    };

    pub fn new(address: NodeAddress, identity: u64) -> Self {
        Self { address, identity }
    }
}

/// How the subscriber wants to receive entry-modified notifications.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NotificationMode {
    /// The modification completes only after the subscriber has been notified.
    Synchronous,
    /// Notifications are delivered after the modification completes.
    Asynchronous,
}

/// Kinds of entry modifications a subscriber can ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryModifiedEventType {
    Added,
    Updated,
    Removed,
    Evicted,
    Expired,
}

/// A registration for modification events on one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: SubscriberId,
    pub notification_mode: NotificationMode,
    pub event_types: BTreeSet<EntryModifiedEventType>,
}

impl Subscription {
    /// A subscription to every event type, delivered asynchronously.
    pub fn new(subscriber: SubscriberId) -> Self {
        Self {
            subscriber,
            notification_mode: NotificationMode::Asynchronous,
            event_types: [
                EntryModifiedEventType::Added,
                EntryModifiedEventType::Updated,
                EntryModifiedEventType::Removed,
                EntryModifiedEventType::Evicted,
                EntryModifiedEventType::Expired,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn with_notification_mode(mut self, mode: NotificationMode) -> Self {
        self.notification_mode = mode;
        self
    }

    pub fn with_event_types(
        mut self,
        event_types: impl IntoIterator<Item = EntryModifiedEventType>,
    ) -> Self {
        self.event_types = event_types.into_iter().collect();
        self
    }

    pub fn address(&self) -> NodeAddress {
        self.subscriber.address
    }

    pub fn wants(&self, event_type: EntryModifiedEventType) -> bool {
        self.event_types.contains(&event_type)
    }
}

/// Row key of the subscription table.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct SubscriptionSlot {
    bucket: BucketNumber,
    key: CacheKey,
    subscriber: SubscriberId,
}

/// Replicated table of entry-modified subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRegistry {
    slots: BTreeMap<SubscriptionSlot, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of (bucket, key, subscriber) registrations.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Register a subscription. Returns `false` if the subscriber already has one for the key.
    pub fn insert(
        &mut self,
        bucket: BucketNumber,
        key: CacheKey,
        subscription: Subscription,
    ) -> bool {
        let slot = SubscriptionSlot {
            bucket,
            key,
            subscriber: subscription.subscriber,
        };
        if self.slots.contains_key(&slot) {
            return false;
        }
        self.slots.insert(slot, subscription);
        true
    }

    /// Remove one subscriber's registration for a key, returning it if it existed.
    pub fn remove(
        &mut self,
        bucket: BucketNumber,
        key: &CacheKey,
        subscriber: SubscriberId,
    ) -> Option<Subscription> {
        let slot = SubscriptionSlot {
            bucket,
            key: key.clone(),
            subscriber,
        };
        self.slots.remove(&slot)
    }

    /// Remove every subscription whose subscriber lives on `address`.
    ///
    /// Returns the removed rows in table order.
    pub fn remove_subscriber_address(
        &mut self,
        address: NodeAddress,
    ) -> Vec<(BucketNumber, CacheKey, Subscription)> {
        let doomed: Vec<SubscriptionSlot> = self
            .slots
            .keys()
            .filter(|slot| slot.subscriber.address == address)
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|slot| {
                let subscription = self.slots.remove(&slot)?;
                Some((slot.bucket, slot.key, subscription))
            })
            .collect()
    }

    /// Subscriptions for one key.
    pub fn subscriptions(&self, bucket: BucketNumber, key: &CacheKey) -> Vec<&Subscription> {
        let start = SubscriptionSlot {
            bucket,
            key: key.clone(),
            subscriber: SubscriberId::MIN,
        };
        self.slots
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(slot, _)| slot.bucket == bucket && &slot.key == key)
            .map(|(_, subscription)| subscription)
            .collect()
    }

    /// Every subscription of a bucket with its key, in key order.
    pub fn bucket_subscriptions(&self, bucket: BucketNumber) -> Vec<(&CacheKey, &Subscription)> {
        let start = SubscriptionSlot {
            bucket,
            key: CacheKey::default(),
            subscriber: SubscriberId::MIN,
        };
        self.slots
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(slot, _)| slot.bucket == bucket)
            .map(|(slot, subscription)| (&slot.key, subscription))
            .collect()
    }

    /// Distinct keys with at least one subscriber in a bucket.
    pub fn subscribed_keys(&self, bucket: BucketNumber) -> Vec<&CacheKey> {
        let mut keys: Vec<&CacheKey> = self
            .bucket_subscriptions(bucket)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.dedup();
        keys
    }

    pub fn has_subscriptions(&self, bucket: BucketNumber) -> bool {
        !self.bucket_subscriptions(bucket).is_empty()
    }

    /// True if any subscription references a subscriber on `address`.
    pub fn references(&self, address: NodeAddress) -> bool {
        self.slots.keys().any(|slot| slot.subscriber.address == address)
    }

    /// Iterate all rows as (bucket, key, subscription).
    pub fn iter(&self) -> impl Iterator<Item = (BucketNumber, &CacheKey, &Subscription)> {
        self.slots.iter().map(|(slot, subscription)| (slot.bucket, &slot.key, subscription))
    }
}
