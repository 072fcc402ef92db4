use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};

use super::{CounterStore, CounterStoreError, DISABLED};

/// Counter store backed by a Redis server shared by every dispatcher.
///
/// A claim is one `EVALSHA` of a Lua script, which Redis runs atomically.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Wrap an already connected manager.
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(include_str!("select_relay.lua")),
        }
    }

    /// Connect to the server at `url`.
    ///
    /// # Errors
    /// If the url is invalid or the server cannot be reached
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn claim_first(
        &self,
        keys: &[String],
        window: Duration,
    ) -> Result<Option<usize>, CounterStoreError> {
        if keys.is_empty() {
            return Ok(None);
        }

        let mut invocation = self.script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        invocation.arg(window.as_secs().max(1)).arg(DISABLED);

        let mut connection = self.connection.clone();
        let claimed: Option<usize> = invocation.invoke_async(&mut connection).await?;

        Ok(claimed)
    }

    async fn disable(&self, key: &str) -> Result<(), CounterStoreError> {
        let mut connection = self.connection.clone();
        // A plain SET also drops any expiry the key had
        let () = connection.set(key, DISABLED).await?;
        Ok(())
    }

    async fn enable(&self, key: &str) -> Result<(), CounterStoreError> {
        let mut connection = self.connection.clone();
        let () = connection.del(key).await?;
        Ok(())
    }
}
