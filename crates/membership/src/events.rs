//! Local group notifications.
//!
//! Events are produced while a command mutates a group and delivered, in production order, to
//! the subscribers registered on this node once the mutation is complete. Subscribers run on the
//! command-processing context: they must not block, and long reactions such as bucket transfer
//! belong in a task spawned from the callback.

use std::sync::Arc;

use corelib::{BucketNumber, CacheKey};
use parking_lot::RwLock;

use crate::commands::JoinGroupMessage;
use crate::group::GroupKey;
use crate::member::GroupMember;
use crate::subscription::Subscription;

/// An event produced by applying a command to a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupEvent {
    /// A member joined or re-joined the group.
    MemberJoined(GroupMemberJoinedEvent),
    /// A member left the group.
    MemberLeft(GroupMemberLeftEvent),
    /// A join request was rejected.
    MemberFailedToJoin(GroupMemberFailedToJoinEvent),
    /// A subscription to a key was registered.
    SubscriptionAdded(SubscriptionEvent),
    /// A subscription to a key was removed.
    SubscriptionRemoved(SubscriptionEvent),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMemberJoinedEvent {
    pub group: GroupKey,
    /// The member record as it is after the join.
    pub member: GroupMember,
    /// Group version after the join.
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMemberLeftEvent {
    pub group: GroupKey,
    /// The member record as it is after the departure.
    pub member: GroupMember,
    /// Group version after the departure.
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMemberFailedToJoinEvent {
    pub group: GroupKey,
    /// Human-readable rejection reason.
    pub error: String,
    /// The rejected request.
    pub request: JoinGroupMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub bucket_number: BucketNumber,
    pub key: CacheKey,
    pub subscription: Subscription,
}

/// Receiver of membership changes of one group.
pub trait GroupEventSubscriber: Send + Sync {
    fn notify_group_member_joined(&self, event: &GroupMemberJoinedEvent);

    fn notify_group_member_left(&self, event: &GroupMemberLeftEvent);

    fn notify_group_member_failed_to_join(&self, event: &GroupMemberFailedToJoinEvent);
}

/// Receiver of subscription configuration changes of one group.
pub trait EntryEventSubscriptionConfigurationSubscriber: Send + Sync {
    fn notify_subscription_added(
        &self,
        key: &CacheKey,
        subscription: &Subscription,
        bucket_number: BucketNumber,
    );

    fn notify_subscription_removed(
        &self,
        key: &CacheKey,
        subscription: &Subscription,
        bucket_number: BucketNumber,
    );
}

/// Ordered list of subscribers, notified in registration order.
///
/// Notification iterates over a copy of the list so that a subscriber may register or
/// unregister subscribers from inside a callback.
pub struct SubscriberList<S: ?Sized> {
    subscribers: RwLock<Vec<Arc<S>>>,
}

/// Subscribers to member joined/left/failed-to-join events.
pub type GroupEventSubscriberList = SubscriberList<dyn GroupEventSubscriber>;

/// Subscribers to subscription added/removed events.
pub type EntrySubscriptionSubscriberList =
    SubscriberList<dyn EntryEventSubscriptionConfigurationSubscriber>;

impl<S: ?Sized> SubscriberList<S> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<S>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove a subscriber by pointer identity. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, subscriber: &Arc<S>) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        // Data pointers only: vtable pointers of one object may differ between codegen units
        let target = Arc::as_ptr(subscriber) as *const ();
        subscribers.retain(|registered| Arc::as_ptr(registered) as *const () != target);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<S>> {
        self.subscribers.read().clone()
    }
}

impl<S: ?Sized> Default for SubscriberList<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupEventSubscriberList {
    /// Deliver a membership event. Subscription events are ignored.
    pub fn notify(&self, event: &GroupEvent) {
        match event {
            GroupEvent::MemberJoined(event) => {
                for subscriber in self.snapshot() {
                    subscriber.notify_group_member_joined(event);
                }
            }
            GroupEvent::MemberLeft(event) => {
                for subscriber in self.snapshot() {
                    subscriber.notify_group_member_left(event);
                }
            }
            GroupEvent::MemberFailedToJoin(event) => {
                for subscriber in self.snapshot() {
                    subscriber.notify_group_member_failed_to_join(event);
                }
            }
            GroupEvent::SubscriptionAdded(_) | GroupEvent::SubscriptionRemoved(_) => {}
        }
    }
}

impl EntrySubscriptionSubscriberList {
    /// Deliver a subscription event. Membership events are ignored.
    pub fn notify(&self, event: &GroupEvent) {
        match event {
            GroupEvent::SubscriptionAdded(event) => {
                for subscriber in self.snapshot() {
                    subscriber.notify_subscription_added(
                        &event.key,
                        &event.subscription,
                        event.bucket_number,
                    );
                }
            }
            GroupEvent::SubscriptionRemoved(event) => {
                for subscriber in self.snapshot() {
                    subscriber.notify_subscription_removed(
                        &event.key,
                        &event.subscription,
                        event.bucket_number,
                    );
                }
            }
            _ => {}
        }
    }
}
