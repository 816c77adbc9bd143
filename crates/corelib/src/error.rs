//! Error types for the core library.
//!
//! Every variant is a programming-error invariant violation. Replicated state mutations check
//! their preconditions before touching any state, so an error means nothing was applied. The
//! command processor treats all of them as fatal.

use thiserror::Error;

use crate::bucket::BucketNumber;
use crate::node::NodeAddress;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Invariant violations raised while applying replicated state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The partition of a group may be configured exactly once.
    #[error("partition of group {group} is already configured")]
    PartitionAlreadyConfigured { group: String },
    /// A contributor tried to join a group whose partition is not configured.
    #[error("partition of group {group} is not configured")]
    PartitionNotConfigured { group: String },
    /// Replica count below zero or above `MAX_REPLICA_COUNT`.
    #[error("invalid replica count: {0}")]
    InvalidReplicaCount(i32),
    /// Non-positive partition size.
    #[error("invalid partition size: {0} bytes")]
    InvalidPartitionSize(i64),
    /// A partition contributor must bring a positive heap.
    #[error("invalid heap size of partition contributor {address}: {heap_size_bytes} bytes")]
    InvalidHeapSize { address: NodeAddress, heap_size_bytes: i64 },
    /// Re-activation of a member that is still active.
    #[error("member {address} of group {group} is already active")]
    MemberAlreadyActive { group: String, address: NodeAddress },
    /// Bucket number outside of `[0, bucket_count)`.
    #[error("bucket {bucket} is out of range, bucket count is {bucket_count}")]
    InvalidBucket { bucket: BucketNumber, bucket_count: u32 },
    /// A snapshot taken with a different bucket count cannot be installed.
    #[error("snapshot bucket count {snapshot} does not match local bucket count {local}")]
    BucketCountMismatch { snapshot: u32, local: u32 },
}
