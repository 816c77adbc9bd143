//! Cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serialized cache key.
///
/// The membership engine never looks inside a key; it only needs to order, compare and hash it.
/// The empty key is the smallest key and doubles as a range bound.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub Vec<u8>);

impl CacheKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        CacheKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey(value.as_bytes().to_vec())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey(value.into_bytes())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", String::from_utf8_lossy(&self.0))
    }
}
