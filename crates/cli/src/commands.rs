//! Command implementations.

use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use corelib::{NodeAddress, Partitioner, Xxh3Partitioner, PRIMARY_STORAGE};
use membership::{
    GroupEventSubscriber, GroupKey, GroupMemberFailedToJoinEvent, GroupMemberJoinedEvent,
    GroupMemberLeftEvent, GroupRegistry, RegistrySnapshot,
};
use streaming::{CommandBroadcaster, CommandProcessor, LocalBroadcast};

use crate::config::{CliCommand, CliConfig, Scenario};

/// Execute the parsed command line.
pub async fn run(config: CliConfig) -> Result<()> {
    match config.command {
        CliCommand::Simulate { scenario, nodes } => {
            let scenario = Scenario::load(&scenario)?;
            let outcome = simulate(&scenario, nodes).await?;
            print!("{}", outcome);
        }
        CliCommand::Bucket { key, bucket_count } => {
            ensure!(bucket_count > 0, "bucket count must be positive");
            let partitioner = Xxh3Partitioner::new(bucket_count);
            println!("{}", partitioner.bucket_of(key.as_bytes()));
        }
    }
    Ok(())
}

/// Converged state of a simulated cluster.
#[derive(Debug)]
pub struct SimulationOutcome {
    pub nodes: usize,
    /// Commands applied by every node.
    pub executed: u64,
    pub snapshot: RegistrySnapshot,
}

/// Logs membership changes seen by the first simulated node.
struct EventLog;

impl GroupEventSubscriber for EventLog {
    fn notify_group_member_joined(&self, event: &GroupMemberJoinedEvent) {
        tracing::info!(
            group = %event.group,
            address = %event.member.address(),
            version = event.version,
            "member joined"
        );
    }

    fn notify_group_member_left(&self, event: &GroupMemberLeftEvent) {
        tracing::info!(
            group = %event.group,
            address = %event.member.address(),
            version = event.version,
            "member left"
        );
    }

    fn notify_group_member_failed_to_join(&self, event: &GroupMemberFailedToJoinEvent) {
        tracing::warn!(group = %event.group, error = %event.error, "member failed to join");
    }
}

/// Replay `scenario` on `nodes` simulated nodes and check that they converge.
pub async fn simulate(scenario: &Scenario, nodes: usize) -> Result<SimulationOutcome> {
    ensure!(nodes > 0, "at least one node is required");
    let partitioner = Xxh3Partitioner::new(scenario.bucket_count);
    let bus = LocalBroadcast::new();

    let mut registries = Vec::with_capacity(nodes);
    let mut handles = Vec::with_capacity(nodes);
    for index in 0..nodes {
        let registry = Arc::new(GroupRegistry::new(scenario.bucket_count));
        if index == 0 {
            let log: Arc<dyn GroupEventSubscriber> = Arc::new(EventLog);
            for name in scenario.group_names() {
                registry.subscribe_group_events(&GroupKey::cache(name), log.clone());
            }
        }
        let node = NodeAddress::from(index as u128 + 1);
        handles.push(CommandProcessor::new(node, registry.clone(), bus.subscribe()).spawn());
        registries.push(registry);
    }

    for (index, step) in scenario.steps.iter().enumerate() {
        bus.post(step.to_command(&partitioner))
            .with_context(|| format!("error posting step {}", index))?;
    }
    bus.close();

    let mut executed = 0;
    for handle in handles {
        let report = handle.await.context("command processor panicked")??;
        executed = report.executed;
    }

    let snapshot = registries[0].snapshot();
    for (index, registry) in registries.iter().enumerate().skip(1) {
        ensure!(registry.snapshot() == snapshot, "node {} diverged from node 1", index + 1);
    }
    Ok(SimulationOutcome {
        nodes,
        executed,
        snapshot,
    })
}

impl fmt::Display for SimulationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} nodes converged after {} commands", self.nodes, self.executed)?;
        for group in &self.snapshot.groups {
            writeln!(f)?;
            writeln!(
                f,
                "group {} version {} replicas {} partition {} bytes",
                group.key(),
                group.version(),
                group.replica_count(),
                group.partition_size_bytes()
            )?;
            for member in group.members() {
                let state = match (member.is_active(), member.is_leaving()) {
                    (true, true) => "leaving",
                    (true, false) => "active",
                    (false, _) => "inactive",
                };
                let role = if member.is_partition_contributor() { "contributor" } else { "client" };
                writeln!(f, "  member {} {} {}", member.address(), role, state)?;
            }

            let ownership = group.bucket_ownership();
            for address in ownership.partition_contributors_addresses() {
                let counts: Vec<String> = (0..ownership.storage_count())
                    .map(|storage| ownership.owned_bucket_count(storage, *address).to_string())
                    .collect();
                writeln!(f, "  owner {} buckets per tier [{}]", address, counts.join(", "))?;
            }
            let unowned = (0..ownership.bucket_count())
                .filter(|bucket| ownership.bucket_owner_address(PRIMARY_STORAGE, *bucket).is_none())
                .count();
            if ownership.bucket_count() > 0 && unowned > 0 {
                writeln!(f, "  {} buckets without primary", unowned)?;
            }
            if !group.subscriptions().is_empty() {
                writeln!(f, "  {} subscriptions", group.subscriptions().len())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = include_str!("../../../demos/orders.json");

    #[tokio::test]
    async fn test_orders_demo_converges() {
        let scenario = Scenario::from_json(ORDERS).unwrap();
        let outcome = simulate(&scenario, 3).await.unwrap();

        assert_eq!(outcome.executed, scenario.steps.len() as u64);
        let group = &outcome.snapshot.groups[0];
        assert_eq!(group.key(), &GroupKey::cache("orders"));
        assert_eq!(group.version(), 3);
        // Only node 3 is left, it owns every bucket
        let ownership = group.bucket_ownership();
        assert_eq!(ownership.owned_bucket_count(PRIMARY_STORAGE, NodeAddress(3)), 4);

        let rendered = outcome.to_string();
        assert!(rendered.starts_with("3 nodes converged after"));
        assert!(rendered.contains("group cache:orders version 3"));
    }

    #[tokio::test]
    async fn test_violation_aborts_simulation() {
        let scenario = Scenario::from_json(
            r#"{"bucket_count": 4, "steps": [
                {"op": "join", "group": "orders", "node": 1, "client": true},
                {"op": "join", "group": "orders", "node": 1, "client": true}
            ]}"#,
        )
        .unwrap();
        let err = simulate(&scenario, 2).await.unwrap_err();
        assert!(err.to_string().contains("fatal error applying command #1"));
    }

    #[tokio::test]
    async fn test_zero_nodes_rejected() {
        let scenario = Scenario::from_json(r#"{"steps": []}"#).unwrap();
        assert!(simulate(&scenario, 0).await.is_err());
    }
}
