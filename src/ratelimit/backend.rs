//! Counter store trait for abstracting in-process and shared implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the call fits within the limit
    pub allowed: bool,
    /// The key's count after this call, denied calls included
    pub current_count: u64,
}

impl Decision {
    /// Build a decision from the post-increment count.
    pub fn from_count(current_count: u64, limit: u64) -> Self {
        Self {
            allowed: current_count <= limit,
            current_count,
        }
    }
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the in-process `MemoryStore` and the shared
/// `RedisStore` so the `Gate` can work with either. Implementations must run
/// the read, increment and compare for a key as one indivisible step relative
/// to every other call for the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fixed-window check-and-increment.
    ///
    /// An absent or expired counter is created with a count of 1 and a TTL of
    /// `window`. A live counter is incremented without touching its TTL. The
    /// increment is kept even when the call is denied.
    async fn check_and_increment(&self, key: &str, limit: u64, window: Duration)
        -> Result<Decision>;
}
