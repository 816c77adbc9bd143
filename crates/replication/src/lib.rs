//! Replica-tier bucket ownership for partitioned cache groups.
//!
//! This crate decides which partition contributor owns which bucket:
//! - How buckets are spread when a contributor joins
//! - Where the buckets of departed contributors go
//! - Which contributor holds each replica tier of a bucket

pub mod assignment;
mod placement;

pub use assignment::{BucketOwnershipAssignment, BucketReassignment};
