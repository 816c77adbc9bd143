//! Command execution.
//!
//! `execute` is the single entry point of the replicated state machine. It runs on the
//! command-processing context of every node, for every command, in delivery order.
//!
//! # Algorithm (join)
//!
//! 1. Validate the request, creating the group if it does not exist
//! 2. A contributor joining an unconfigured group configures it with its own values
//! 3. A contributor joining an already configured group must bring a heap of at least the
//!    partition size; otherwise the join is rejected with `GroupMemberFailedToJoinEvent`
//! 4. Add the member
//!
//! Events are published after the group lock is released so that subscribers may read the group.

use corelib::{NodeAddress, Result};

use crate::commands::{
    AddSubscriptionCommand, Command, JoinGroupMessage, MarkLeavingCommand, NodesLeftCommand,
    RemoveMembersCommand, RemoveSubscriptionCommand,
};
use crate::events::{GroupEvent, GroupMemberFailedToJoinEvent};
use crate::group::{GroupKey, PartitionConfiguration};
use crate::registry::GroupRegistry;

/// Apply one replicated command to the local registry.
///
/// An error is an invariant violation: the command was not applied and the caller must stop
/// processing commands, since continuing would let this node diverge from the cluster.
pub fn execute(registry: &GroupRegistry, command: &Command) -> Result<()> {
    match command {
        Command::JoinGroup(message) => join_group(registry, message),
        Command::RemoveMembers(command) => remove_members(registry, command),
        Command::NodesLeft(command) => nodes_left(registry, command),
        Command::MarkLeaving(command) => mark_leaving(registry, command),
        Command::AddSubscription(command) => add_subscription(registry, command),
        Command::RemoveSubscription(command) => remove_subscription(registry, command),
    }
}

fn join_group(registry: &GroupRegistry, message: &JoinGroupMessage) -> Result<()> {
    let member = message.to_member();
    let requested_partition = if message.partition_contributor {
        Some(PartitionConfiguration::new(
            message.replica_count,
            message.partition_size,
            message.max_elements,
        )?)
    } else {
        None
    };

    let key = message.group_key();
    if registry.group(&key).is_none() {
        // Nothing, not even the group, may be created for a request that will fail
        member.validate()?;
    }
    let (group, _) = registry.get_or_create_group(&key);
    let events = {
        let mut group = group.write();
        let already_configured = group.is_partition_configured();

        let heap_too_small = message.heap_size_bytes < group.partition_size_bytes();

        if message.partition_contributor && already_configured && heap_too_small {
            let error = format!(
                "cannot join group {}: heap size of {} bytes of member {} \
                 is less than the partition size of {} bytes",
                key,
                message.heap_size_bytes,
                message.sender_address,
                group.partition_size_bytes()
            );
            tracing::warn!(
                group = %key,
                address = %message.sender_address,
                heap_size_bytes = message.heap_size_bytes,
                "join rejected"
            );
            metrics::counter!("cachegroup_join_rejections_total").increment(1);
            vec![GroupEvent::MemberFailedToJoin(GroupMemberFailedToJoinEvent {
                group: key.clone(),
                error,
                request: message.clone(),
            })]
        } else {
            group.check_admissible(&member)?;
            if let Some(partition) = requested_partition.filter(|_| !already_configured) {
                group.configure_partition(
                    message.replica_count,
                    partition.partition_size_bytes,
                    partition.max_elements,
                )?;
            }
            group.add_member(member)?;
            group.take_events()
        }
    };
    registry.publish(&key, &events);
    Ok(())
}

fn remove_members(registry: &GroupRegistry, command: &RemoveMembersCommand) -> Result<()> {
    let key = command.group_key();
    match registry.group(&key) {
        Some(_) => remove_from_group(registry, &key, &command.addresses),
        None => tracing::debug!(group = %key, "remove members from unknown group ignored"),
    }
    Ok(())
}

fn nodes_left(registry: &GroupRegistry, command: &NodesLeftCommand) -> Result<()> {
    for key in registry.group_keys() {
        remove_from_group(registry, &key, &command.addresses);
    }
    Ok(())
}

fn remove_from_group(registry: &GroupRegistry, key: &GroupKey, addresses: &[NodeAddress]) {
    let Some(group) = registry.group(key) else {
        return;
    };
    let events = {
        let mut group = group.write();
        let changes = group.remove_members(addresses);
        if !changes.is_empty() {
            tracing::debug!(
                group = %key,
                reassigned = changes.len(),
                "buckets reassigned after departure"
            );
        }
        group.take_events()
    };
    registry.publish(key, &events);
}

fn mark_leaving(registry: &GroupRegistry, command: &MarkLeavingCommand) -> Result<()> {
    for key in registry.group_keys() {
        if let Some(group) = registry.group(&key) {
            let mut group = group.write();
            for address in &command.addresses {
                group.mark_leaving(*address);
            }
        }
    }
    Ok(())
}

fn add_subscription(registry: &GroupRegistry, command: &AddSubscriptionCommand) -> Result<()> {
    let key = command.group_key();
    let Some(group) = registry.group(&key) else {
        tracing::debug!(group = %key, "subscription to unknown group ignored");
        return Ok(());
    };
    let events = {
        let mut group = group.write();
        group.add_subscriptions(&command.keys, &command.subscription)?;
        group.take_events()
    };
    registry.publish(&key, &events);
    Ok(())
}

fn remove_subscription(
    registry: &GroupRegistry,
    command: &RemoveSubscriptionCommand,
) -> Result<()> {
    let key = command.group_key();
    let Some(group) = registry.group(&key) else {
        tracing::debug!(group = %key, "unsubscribe from unknown group ignored");
        return Ok(());
    };
    let events = {
        let mut group = group.write();
        group.remove_subscriptions(&command.keys, command.subscriber)?;
        group.take_events()
    };
    registry.publish(&key, &events);
    Ok(())
}
