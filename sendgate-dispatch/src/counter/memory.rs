use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CounterStore, CounterStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Counter { value: u64, expires_at: Instant },
    Disabled,
}

/// In-process counter store.
///
/// Claims are made atomic by holding one lock for the whole walk. Expiry is
/// measured on the tokio clock, so paused-time tests can step through a
/// window with `tokio::time::advance`.
///
/// Only workers inside one process share it; multi-process deployments need
/// [`RedisCounterStore`](super::RedisCounterStore).
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    slots: Arc<Mutex<AHashMap<String, Slot>>>,
    evaluations: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the store has been asked to claim a key.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// The live counter value of `key`, if any.
    #[must_use]
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        match self.slots.lock().get(key) {
            Some(Slot::Counter { value, expires_at }) if *expires_at > now => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_disabled(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Disabled))
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), CounterStoreError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(CounterStoreError::Unavailable(
                "memory counter store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn claim_first(
        &self,
        keys: &[String],
        window: Duration,
    ) -> Result<Option<usize>, CounterStoreError> {
        self.check_available()?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut slots = self.slots.lock();

        for (index, key) in keys.iter().enumerate() {
            let slot = slots.entry(key.clone()).or_insert(Slot::Counter {
                value: 0,
                expires_at: now,
            });

            let Slot::Counter { value, expires_at } = slot else {
                continue;
            };

            // An expired counter is gone
            if *expires_at <= now {
                *value = 0;
            }

            *value += 1;
            if *value == 1 {
                *expires_at = now + window;
                return Ok(Some(index));
            }
        }

        Ok(None)
    }

    async fn disable(&self, key: &str) -> Result<(), CounterStoreError> {
        self.check_available()?;
        self.slots.lock().insert(key.to_string(), Slot::Disabled);
        Ok(())
    }

    async fn enable(&self, key: &str) -> Result<(), CounterStoreError> {
        self.check_available()?;
        self.slots.lock().remove(key);
        Ok(())
    }
}
