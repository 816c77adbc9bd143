//! Replicated membership commands.
//!
//! Commands are plain data. They are delivered in the same total order to every node and
//! applied by `dispatch::execute`; nothing in them refers to the node executing them.

use std::collections::{BTreeMap, BTreeSet};

use corelib::{BucketNumber, CacheKey, NodeAddress};
use serde::{Deserialize, Serialize};

use crate::group::{GroupKey, GroupType};
use crate::member::GroupMember;
use crate::subscription::{SubscriberId, Subscription};

/// Keys to (un)subscribe, grouped by bucket.
pub type BucketKeys = BTreeMap<BucketNumber, BTreeSet<CacheKey>>;

/// Request of a node to join a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGroupMessage {
    pub group_name: String,
    pub group_type: GroupType,
    pub sender_address: NodeAddress,
    pub partition_contributor: bool,
    /// Partition size the sender wants if it ends up configuring the group.
    pub partition_size: i64,
    pub heap_size_bytes: i64,
    pub max_elements: i64,
    pub replica_count: i32,
    pub cache_config_name: String,
}

impl JoinGroupMessage {
    /// A join from a partition contributor.
    pub fn contributor(
        group_name: impl Into<String>,
        sender_address: NodeAddress,
        heap_size_bytes: i64,
        partition_size: i64,
        max_elements: i64,
        replica_count: i32,
    ) -> Self {
        let group_name = group_name.into();
        Self {
            cache_config_name: group_name.clone(),
            group_name,
            group_type: GroupType::Cache,
            sender_address,
            partition_contributor: true,
            partition_size,
            heap_size_bytes,
            max_elements,
            replica_count,
        }
    }

    /// A join from a client-only node.
    pub fn client(group_name: impl Into<String>, sender_address: NodeAddress) -> Self {
        let group_name = group_name.into();
        Self {
            cache_config_name: group_name.clone(),
            group_name,
            group_type: GroupType::Cache,
            sender_address,
            partition_contributor: false,
            partition_size: 0,
            heap_size_bytes: 0,
            max_elements: 0,
            replica_count: 0,
        }
    }

    pub fn with_cache_config_name(mut self, name: impl Into<String>) -> Self {
        self.cache_config_name = name.into();
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.group_type, self.group_name.clone())
    }

    /// The member record this request asks for.
    pub fn to_member(&self) -> GroupMember {
        GroupMember::new(
            self.sender_address,
            self.partition_contributor,
            self.heap_size_bytes,
            self.cache_config_name.clone(),
        )
    }
}

/// Departure of a batch of nodes from one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMembersCommand {
    pub group_name: String,
    pub group_type: GroupType,
    pub addresses: Vec<NodeAddress>,
}

impl RemoveMembersCommand {
    pub fn new(
        group_type: GroupType,
        group_name: impl Into<String>,
        addresses: Vec<NodeAddress>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            group_type,
            addresses,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.group_type, self.group_name.clone())
    }
}

/// Departure of a batch of nodes from the cluster, and so from every group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesLeftCommand {
    pub addresses: Vec<NodeAddress>,
}

/// Start of a graceful shutdown of a batch of nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLeavingCommand {
    pub addresses: Vec<NodeAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSubscriptionCommand {
    pub group_name: String,
    pub group_type: GroupType,
    pub keys: BucketKeys,
    pub subscription: Subscription,
}

impl AddSubscriptionCommand {
    pub fn new(
        group_name: impl Into<String>,
        keys: BucketKeys,
        subscription: Subscription,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            group_type: GroupType::Cache,
            keys,
            subscription,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.group_type, self.group_name.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSubscriptionCommand {
    pub group_name: String,
    pub group_type: GroupType,
    pub keys: BucketKeys,
    pub subscriber: SubscriberId,
}

impl RemoveSubscriptionCommand {
    pub fn new(group_name: impl Into<String>, keys: BucketKeys, subscriber: SubscriberId) -> Self {
        Self {
            group_name: group_name.into(),
            group_type: GroupType::Cache,
            keys,
            subscriber,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.group_type, self.group_name.clone())
    }
}

/// Every command the membership state machine understands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    JoinGroup(JoinGroupMessage),
    RemoveMembers(RemoveMembersCommand),
    NodesLeft(NodesLeftCommand),
    MarkLeaving(MarkLeavingCommand),
    AddSubscription(AddSubscriptionCommand),
    RemoveSubscription(RemoveSubscriptionCommand),
}

impl Command {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::JoinGroup(_) => "join_group",
            Command::RemoveMembers(_) => "remove_members",
            Command::NodesLeft(_) => "nodes_left",
            Command::MarkLeaving(_) => "mark_leaving",
            Command::AddSubscription(_) => "add_subscription",
            Command::RemoveSubscription(_) => "remove_subscription",
        }
    }

    /// The group the command targets, `None` for cluster-wide commands.
    pub fn group_key(&self) -> Option<GroupKey> {
        match self {
            Command::JoinGroup(message) => Some(message.group_key()),
            Command::RemoveMembers(command) => Some(command.group_key()),
            Command::AddSubscription(command) => Some(command.group_key()),
            Command::RemoveSubscription(command) => Some(command.group_key()),
            Command::NodesLeft(_) | Command::MarkLeaving(_) => None,
        }
    }
}

impl From<JoinGroupMessage> for Command {
    fn from(message: JoinGroupMessage) -> Self {
        Command::JoinGroup(message)
    }
}

impl From<RemoveMembersCommand> for Command {
    fn from(command: RemoveMembersCommand) -> Self {
        Command::RemoveMembers(command)
    }
}

impl From<AddSubscriptionCommand> for Command {
    fn from(command: AddSubscriptionCommand) -> Self {
        Command::AddSubscription(command)
    }
}

impl From<RemoveSubscriptionCommand> for Command {
    fn from(command: RemoveSubscriptionCommand) -> Self {
        Command::RemoveSubscription(command)
    }
}

impl From<NodesLeftCommand> for Command {
    fn from(command: NodesLeftCommand) -> Self {
        Command::NodesLeft(command)
    }
}

impl From<MarkLeavingCommand> for Command {
    fn from(command: MarkLeavingCommand) -> Self {
        Command::MarkLeaving(command)
    }
}
