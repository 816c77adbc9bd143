//! Tests for key-to-bucket mapping.
//!
//! # Test Strategy
//!
//! 1. **Range**: every key lands in `[0, bucket_count)`
//! 2. **Stability**: independent partitioners agree
//! 3. **Spread**: many keys touch every bucket of a small key space

use std::collections::HashSet;

use corelib::{Partitioner, Xxh3Partitioner};

// ============================================================================
// Basic Functionality Tests
// ============================================================================

#[test]
fn test_bucket_of_range() {
    let partitioner = Xxh3Partitioner::new(7);
    for i in 0..1_000 {
        let key = format!("key-{}", i);
        assert!(partitioner.bucket_of(key.as_bytes()) < 7);
    }
}

#[test]
fn test_independent_partitioners_agree() {
    // Two nodes build their own partitioner and must agree on every key
    let node_a = Xxh3Partitioner::new(1024);
    let node_b = Xxh3Partitioner::new(1024);
    for i in 0..100 {
        let key = format!("orders:{}", i);
        assert_eq!(node_a.bucket_of(key.as_bytes()), node_b.bucket_of(key.as_bytes()));
    }
}

// ============================================================================
// Distribution Tests
// ============================================================================

#[test]
fn test_all_buckets_reached() {
    let partitioner = Xxh3Partitioner::new(8);
    let buckets: HashSet<u32> = (0..2_000)
        .map(|i| partitioner.bucket_of(format!("k{}", i).as_bytes()))
        .collect();
    assert_eq!(buckets.len(), 8, "2000 keys should touch all 8 buckets");
}

#[test]
fn test_partitioner_name() {
    assert_eq!(Xxh3Partitioner::default().name(), "Xxh3Partitioner");
}
