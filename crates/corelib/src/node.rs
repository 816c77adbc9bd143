//! Node addresses.
//!
//! Nodes are identified by a compact, opaque `NodeAddress` that is cheap to compare and hash.
//! Ordering of addresses is used for deterministic tie-breaking, so every node of the cluster
//! must agree on it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque address of a cluster node.
///
/// Newtype over `u128` so comparisons and hashing are very fast while giving
/// plenty of space for uniqueness.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeAddress(pub u128);

impl NodeAddress {
    /// The lowest possible address, used as a range bound.
    pub const MIN: NodeAddress = NodeAddress(0);
}

impl From<u128> for NodeAddress {
    fn from(value: u128) -> Self {
        NodeAddress(value)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
