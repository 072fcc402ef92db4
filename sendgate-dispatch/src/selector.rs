//! Rate limited relay selection
//!
//! Mail to an unfiltered domain always goes through the first relay and
//! never touches the counter store. Mail to a filtered domain claims the
//! first relay whose `(relay, domain)` pair is free in the current window;
//! when none is, selection fails and the caller's redelivery retries later.

use std::{fmt, sync::Arc};

use sendgate_common::{Domain, RelayIndex, RelayRegistry, RelayServer, tracing};

use crate::{RateLimitConfig, SelectError, counter::CounterStore};

pub struct RelaySelector {
    registry: Arc<RelayRegistry>,
    store: Arc<dyn CounterStore>,
    rate_limit: RateLimitConfig,
}

impl fmt::Debug for RelaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySelector")
            .field("relays", &self.registry.len())
            .field("store", &self.store)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl RelaySelector {
    #[must_use]
    pub fn new(
        registry: Arc<RelayRegistry>,
        store: Arc<dyn CounterStore>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            registry,
            store,
            rate_limit,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RelayRegistry {
        &self.registry
    }

    /// The counter key for a `(relay, domain)` pair: `{prefix}{index}:{domain}`.
    #[must_use]
    pub fn key(&self, index: RelayIndex, domain: &Domain) -> String {
        format!("{}{index}:{domain}", self.rate_limit.key_prefix)
    }

    fn keys(&self, domain: &Domain) -> Vec<String> {
        (0..self.registry.len())
            .map(|index| self.key(index, domain))
            .collect()
    }

    /// Pick the relay to send mail for `domain` through.
    ///
    /// # Errors
    ///
    /// [`SelectError::NoAvailableRelay`] if every relay is held or disabled
    /// for a filtered domain, or a store error. Selection is attempted once.
    pub async fn select(
        &self,
        domain: &Domain,
    ) -> Result<(RelayIndex, &RelayServer), SelectError> {
        if !self.registry.is_filtered(domain) {
            return Ok((0, self.registry.primary()));
        }

        let claimed = self
            .store
            .claim_first(&self.keys(domain), self.rate_limit.window())
            .await?;

        let Some(index) = claimed else {
            tracing::debug!(%domain, "Every relay is held for this window");
            return Err(SelectError::NoAvailableRelay(domain.clone()));
        };

        let relay = self
            .registry
            .get(index)
            .ok_or(SelectError::UnknownRelay(index))?;

        tracing::debug!(%domain, relay = index, "Claimed relay for this window");
        Ok((index, relay))
    }

    /// Take relay `index` out of rotation for `domain` until re-enabled.
    ///
    /// # Errors
    /// If the index is not configured or the store fails
    pub async fn disable(&self, index: RelayIndex, domain: &Domain) -> Result<(), SelectError> {
        self.registry
            .get(index)
            .ok_or(SelectError::UnknownRelay(index))?;
        self.store.disable(&self.key(index, domain)).await?;

        tracing::info!(%domain, relay = index, "Relay disabled");
        Ok(())
    }

    /// Put relay `index` back into rotation for `domain`.
    ///
    /// # Errors
    /// If the index is not configured or the store fails
    pub async fn enable(&self, index: RelayIndex, domain: &Domain) -> Result<(), SelectError> {
        self.registry
            .get(index)
            .ok_or(SelectError::UnknownRelay(index))?;
        self.store.enable(&self.key(index, domain)).await?;

        tracing::info!(%domain, relay = index, "Relay enabled");
        Ok(())
    }
}
