//! xxh3 partitioner implementation.

use xxhash_rust::xxh3::xxh3_64;

use crate::bucket::{BucketNumber, BUCKET_COUNT};
use crate::partitioner::traits::Partitioner;

/// Partitioner hashing keys with xxh3 and reducing the hash modulo the bucket count.
#[derive(Clone, Debug)]
pub struct Xxh3Partitioner {
    bucket_count: u32,
}

impl Xxh3Partitioner {
    /// Create a partitioner over `bucket_count` buckets.
    ///
    /// A zero bucket count is raised to one so that every key still maps somewhere.
    pub fn new(bucket_count: u32) -> Self {
        Self {
            bucket_count: bucket_count.max(1),
        }
    }
}

impl Default for Xxh3Partitioner {
    fn default() -> Self {
        Self::new(BUCKET_COUNT)
    }
}

impl Partitioner for Xxh3Partitioner {
    fn bucket_of(&self, key: &[u8]) -> BucketNumber {
        (xxh3_64(key) % u64::from(self.bucket_count)) as BucketNumber
    }

    fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    fn name(&self) -> &'static str {
        "Xxh3Partitioner"
    }
}
