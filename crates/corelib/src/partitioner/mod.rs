//! Partitioner abstraction.
//!
//! Partitioners are responsible for converting cache keys into the bucket numbers
//! that own them.

pub mod traits;
pub mod xxh3;

pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;
