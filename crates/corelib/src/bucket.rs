//! Bucket numbering.
//!
//! The key space of every cache group is cut into a fixed number of buckets. A bucket is owned
//! at several storage tiers: storage number 0 is the primary owner, 1..=replica_count are the
//! replica owners.

/// Index of a bucket in `[0, bucket_count)`.
pub type BucketNumber = u32;

/// Storage tier of a bucket owner. `0` is the primary.
pub type StorageNumber = u32;

/// Cluster-wide number of buckets every configured cache group is divided into.
pub const BUCKET_COUNT: u32 = 1024;

/// Storage number of the primary owner of a bucket.
pub const PRIMARY_STORAGE: StorageNumber = 0;

/// Largest replica count a group may be configured with. The ownership table holds
/// `replica_count + 1` tiers of `BUCKET_COUNT` slots.
pub const MAX_REPLICA_COUNT: u32 = 6;
