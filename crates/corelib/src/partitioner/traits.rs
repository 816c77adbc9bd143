//! Core partitioner trait definitions.

use crate::bucket::BucketNumber;

/// A partitioner converts keys into bucket numbers.
///
/// Partitioners are stateless and thread-safe. The mapping must be a pure function that every
/// node of the cluster computes identically, otherwise nodes disagree about key ownership.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts a key into a bucket number.
    ///
    /// # Arguments
    ///
    /// * `key` - The serialized key
    ///
    /// # Returns
    ///
    /// A bucket number in `[0, bucket_count())`
    fn bucket_of(&self, key: &[u8]) -> BucketNumber;

    /// Returns the number of buckets this partitioner distributes keys over.
    fn bucket_count(&self) -> u32;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
