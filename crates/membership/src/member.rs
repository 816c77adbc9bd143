//! Group members.

use corelib::{Error, NodeAddress, Result};
use serde::{Deserialize, Serialize};

/// Per-node record of membership in one group.
///
/// Records are never deleted from a group. A departed node is marked inactive and a later join
/// from the same address re-activates the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    address: NodeAddress,
    active: bool,
    leaving: bool,
    partition_contributor: bool,
    /// Heap the node brings to the group. Must be positive for a contributor.
    heap_size_bytes: i64,
    cache_config_name: String,
}

impl GroupMember {
    /// Construct a member record. It becomes active when the group adds it.
    pub fn new(
        address: NodeAddress,
        partition_contributor: bool,
        heap_size_bytes: i64,
        cache_config_name: impl Into<String>,
    ) -> Self {
        Self {
            address,
            active: false,
            leaving: false,
            partition_contributor,
            heap_size_bytes,
            cache_config_name: cache_config_name.into(),
        }
    }

    /// A client-only member that contributes no storage.
    pub fn client(address: NodeAddress, cache_config_name: impl Into<String>) -> Self {
        Self::new(address, false, 0, cache_config_name)
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving
    }

    pub fn is_partition_contributor(&self) -> bool {
        self.partition_contributor
    }

    pub fn heap_size_bytes(&self) -> i64 {
        self.heap_size_bytes
    }

    pub fn cache_config_name(&self) -> &str {
        &self.cache_config_name
    }

    /// Check the record on its own: a partition contributor must bring a positive heap.
    pub fn validate(&self) -> Result<()> {
        if self.partition_contributor && self.heap_size_bytes <= 0 {
            return Err(Error::InvalidHeapSize {
                address: self.address,
                heap_size_bytes: self.heap_size_bytes,
            });
        }
        Ok(())
    }

    pub(crate) fn activate(&mut self) {
        self.active = true;
    }

    /// Mark inactive. Clears the leaving flag, the departure is complete.
    pub(crate) fn deactivate(&mut self) {
        self.active = false;
        self.leaving = false;
    }

    pub(crate) fn mark_leaving(&mut self) {
        self.leaving = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_member_is_inactive() {
        let member = GroupMember::new(NodeAddress(1), true, 1_000, "orders-cache");
        assert!(!member.is_active());
        assert!(!member.is_leaving());
        assert!(member.is_partition_contributor());
        assert_eq!(member.heap_size_bytes(), 1_000);
        assert_eq!(member.cache_config_name(), "orders-cache");
    }

    #[test]
    fn test_deactivate_clears_leaving() {
        let mut member = GroupMember::client(NodeAddress(1), "orders-cache");
        member.activate();
        member.mark_leaving();
        assert!(member.is_leaving());

        member.deactivate();
        assert!(!member.is_active());
        assert!(!member.is_leaving());
    }

    #[test]
    fn test_validate_heap() {
        assert!(GroupMember::client(NodeAddress(1), "orders").validate().is_ok());
        assert!(GroupMember::new(NodeAddress(1), true, 1, "orders").validate().is_ok());

        let err = GroupMember::new(NodeAddress(1), true, 0, "orders").validate().unwrap_err();
        assert_eq!(
            err,
            Error::InvalidHeapSize {
                address: NodeAddress(1),
                heap_size_bytes: 0,
            }
        );
    }
}
