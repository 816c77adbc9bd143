//! Replicated group membership for partitioned cache groups.
//!
//! Every node keeps a `GroupRegistry` and feeds it the same totally ordered stream of
//! `Command`s through `execute`. Since execution is deterministic, all nodes agree on:
//! - Which members each group has, and which of them are active or leaving
//! - The partition policy of each group, fixed by its first contributor
//! - The owner of every bucket on every replica tier
//! - Which nodes subscribed to which keys
//!
//! Changes are reported to local subscribers through the traits in `events`.

pub mod commands;
pub mod dispatch;
pub mod events;
pub mod group;
pub mod member;
pub mod registry;
pub mod subscription;

pub use commands::{
    AddSubscriptionCommand, BucketKeys, Command, JoinGroupMessage, MarkLeavingCommand,
    NodesLeftCommand, RemoveMembersCommand, RemoveSubscriptionCommand,
};
pub use dispatch::execute;
pub use events::{
    EntryEventSubscriptionConfigurationSubscriber, GroupEvent, GroupEventSubscriber,
    GroupMemberFailedToJoinEvent, GroupMemberJoinedEvent, GroupMemberLeftEvent, SubscriptionEvent,
};
pub use group::{Group, GroupKey, GroupType, PartitionConfiguration};
pub use member::GroupMember;
pub use registry::{GroupHandle, GroupRegistry, RegistrySnapshot};
pub use subscription::{
    EntryModifiedEventType, NotificationMode, SubscriberId, Subscription, SubscriptionRegistry,
};
