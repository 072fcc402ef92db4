//! Shared counters backing the per-domain relay rate limit
//!
//! Every dispatch worker, in every process, claims `(relay, domain)` pairs
//! through the same store. A claim walks an ordered list of keys and, in a
//! single atomic step, increments each one until an increment lands on `1`:
//! that key's pair is now held for the window and its position is returned.
//! A key holding [`DISABLED`] is skipped without being incremented.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::{memory::MemoryCounterStore, redis_store::RedisCounterStore};

/// The value an operator writes to a key to take a relay out of rotation for
/// a domain. It carries no expiry.
pub const DISABLED: &str = "disabled";

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// An atomic multi-key counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Claim the first free key of `keys` for `window`.
    ///
    /// The whole walk is one atomic evaluation: concurrent claims over the
    /// same keys never both observe a post-increment value of `1` for the
    /// same key within a window.
    ///
    /// # Errors
    /// If the store cannot be reached
    async fn claim_first(
        &self,
        keys: &[String],
        window: Duration,
    ) -> Result<Option<usize>, CounterStoreError>;

    /// Mark `key` as disabled, with no expiry.
    ///
    /// # Errors
    /// If the store cannot be reached
    async fn disable(&self, key: &str) -> Result<(), CounterStoreError>;

    /// Clear `key`, whether it holds a counter or the disabled marker.
    ///
    /// # Errors
    /// If the store cannot be reached
    async fn enable(&self, key: &str) -> Result<(), CounterStoreError>;
}
