//! Command-line arguments and scenario files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corelib::{NodeAddress, Partitioner, BUCKET_COUNT};
use membership::{
    AddSubscriptionCommand, BucketKeys, Command, GroupType, JoinGroupMessage, MarkLeavingCommand,
    NodesLeftCommand, RemoveMembersCommand, RemoveSubscriptionCommand, SubscriberId, Subscription,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(name = "cachegroup", version, about = "Cache group membership and bucket ownership tool")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Replay a scenario on simulated nodes and print the converged state
    Simulate {
        /// Path of the JSON scenario file
        #[arg(long)]
        scenario: PathBuf,
        /// Number of simulated nodes applying the commands
        #[arg(long, default_value_t = 3)]
        nodes: usize,
    },
    /// Print the bucket a key maps to
    Bucket {
        key: String,
        #[arg(long, default_value_t = BUCKET_COUNT)]
        bucket_count: u32,
    },
}

/// An ordered list of membership operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,
    pub steps: Vec<Step>,
}

fn default_bucket_count() -> u32 {
    BUCKET_COUNT
}

/// One scenario operation. Nodes are numbered; node `n` has address `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Join {
        group: String,
        node: u64,
        /// Join as a client that contributes no storage.
        #[serde(default)]
        client: bool,
        #[serde(default)]
        heap_size_bytes: i64,
        #[serde(default)]
        partition_size: i64,
        #[serde(default)]
        max_elements: i64,
        #[serde(default)]
        replica_count: i32,
    },
    Leave {
        group: String,
        nodes: Vec<u64>,
    },
    NodesLeft {
        nodes: Vec<u64>,
    },
    MarkLeaving {
        nodes: Vec<u64>,
    },
    Subscribe {
        group: String,
        node: u64,
        #[serde(default)]
        identity: u64,
        keys: Vec<String>,
    },
    Unsubscribe {
        group: String,
        node: u64,
        #[serde(default)]
        identity: u64,
        keys: Vec<String>,
    },
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("error reading scenario {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("error parsing scenario {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        anyhow::ensure!(scenario.bucket_count > 0, "bucket_count must be positive");
        Ok(scenario)
    }

    /// Names of the groups the scenario touches, sorted and deduplicated.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .steps
            .iter()
            .filter_map(|step| step.group().map(str::to_owned))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Step {
    pub fn group(&self) -> Option<&str> {
        match self {
            Step::Join { group, .. }
            | Step::Leave { group, .. }
            | Step::Subscribe { group, .. }
            | Step::Unsubscribe { group, .. } => Some(group),
            Step::NodesLeft { .. } | Step::MarkLeaving { .. } => None,
        }
    }

    /// Build the replicated command for this step. Keys are mapped with `partitioner`.
    pub fn to_command(&self, partitioner: &dyn Partitioner) -> Command {
        match self {
            Step::Join {
                group,
                node,
                client: true,
                ..
            } => JoinGroupMessage::client(group.as_str(), address(*node)).into(),
            Step::Join {
                group,
                node,
                heap_size_bytes,
                partition_size,
                max_elements,
                replica_count,
                ..
            } => JoinGroupMessage::contributor(
                group.as_str(),
                address(*node),
                *heap_size_bytes,
                *partition_size,
                *max_elements,
                *replica_count,
            )
            .into(),
            Step::Leave { group, nodes } => {
                RemoveMembersCommand::new(GroupType::Cache, group.as_str(), addresses(nodes)).into()
            }
            Step::NodesLeft { nodes } => NodesLeftCommand { addresses: addresses(nodes) }.into(),
            Step::MarkLeaving { nodes } => MarkLeavingCommand {
                addresses: addresses(nodes),
            }
            .into(),
            Step::Subscribe {
                group,
                node,
                identity,
                keys,
            } => {
                let subscription = Subscription::new(SubscriberId::new(address(*node), *identity));
                let keys = bucket_keys(partitioner, keys);
                AddSubscriptionCommand::new(group.as_str(), keys, subscription).into()
            }
            Step::Unsubscribe {
                group,
                node,
                identity,
                keys,
            } => {
                let subscriber = SubscriberId::new(address(*node), *identity);
                let keys = bucket_keys(partitioner, keys);
                RemoveSubscriptionCommand::new(group.as_str(), keys, subscriber).into()
            }
        }
    }
}

fn address(node: u64) -> NodeAddress {
    NodeAddress::from(u128::from(node))
}

fn addresses(nodes: &[u64]) -> Vec<NodeAddress> {
    nodes.iter().copied().map(address).collect()
}

fn bucket_keys(partitioner: &dyn Partitioner, keys: &[String]) -> BucketKeys {
    let mut buckets = BucketKeys::new();
    for key in keys {
        let bucket = partitioner.bucket_of(key.as_bytes());
        buckets.entry(bucket).or_default().insert(key.as_str().into());
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{CacheKey, Xxh3Partitioner};

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_json(
            r#"{
                "bucket_count": 4,
                "steps": [
                    {"op": "join", "group": "orders", "node": 1,
                     "heap_size_bytes": 1000, "partition_size": 500},
                    {"op": "join", "group": "orders", "node": 2, "client": true},
                    {"op": "subscribe", "group": "orders", "node": 2, "keys": ["a"]},
                    {"op": "mark_leaving", "nodes": [1]},
                    {"op": "leave", "group": "orders", "nodes": [1]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.bucket_count, 4);
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.group_names(), vec!["orders".to_string()]);

        let partitioner = Xxh3Partitioner::new(4);
        match scenario.steps[0].to_command(&partitioner) {
            Command::JoinGroup(message) => {
                assert!(message.partition_contributor);
                assert_eq!(message.sender_address, NodeAddress(1));
                assert_eq!(message.partition_size, 500);
            }
            other => panic!("unexpected command {:?}", other),
        }
        match scenario.steps[2].to_command(&partitioner) {
            Command::AddSubscription(command) => {
                let bucket = partitioner.bucket_of(b"a");
                assert!(command.keys[&bucket].contains(&CacheKey::from("a")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_bucket_count() {
        let scenario = Scenario::from_json(r#"{"steps": []}"#).unwrap();
        assert_eq!(scenario.bucket_count, BUCKET_COUNT);
    }

    #[test]
    fn test_zero_bucket_count_rejected() {
        assert!(Scenario::from_json(r#"{"bucket_count": 0, "steps": []}"#).is_err());
    }

    #[test]
    fn test_cli_arguments() {
        let args = ["cachegroup", "bucket", "user:42", "--bucket-count", "16"];
        let config = CliConfig::try_parse_from(args).unwrap();
        match config.command {
            CliCommand::Bucket { key, bucket_count } => {
                assert_eq!(key, "user:42");
                assert_eq!(bucket_count, 16);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
