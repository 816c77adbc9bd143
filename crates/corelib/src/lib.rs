//! Core library for the cache group membership engine.
//!
//! This crate provides the vocabulary shared by every other crate in the workspace:
//! - Node addresses
//! - Cache keys and bucket numbering
//! - The partitioner mapping keys to buckets
//! - Invariant-violation errors raised by replicated state mutations

pub mod bucket;
pub mod error;
pub mod key;
pub mod node;
pub mod partitioner;

pub use bucket::{BucketNumber, StorageNumber, BUCKET_COUNT, MAX_REPLICA_COUNT, PRIMARY_STORAGE};
pub use error::{Error, Result};
pub use key::CacheKey;
pub use node::NodeAddress;
pub use partitioner::{Partitioner, Xxh3Partitioner};
