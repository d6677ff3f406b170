//! Server-assisted client-side caching.
//!
//! A single tracking connection serves reads from its client-side cache and
//! relies on the store to push invalidations for keys it has handed out.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CachingStrategy, Lookup, StrategyError};
use crate::config::ServerAssistedConfig;
use crate::store::{Endpoint, TrackingClient};

const NAME: &str = "Server-Assisted Client Cache";

pub struct ServerAssistedStrategy {
    endpoint: Endpoint,
    config: ServerAssistedConfig,
    client: RwLock<Option<Arc<TrackingClient>>>,
}

impl ServerAssistedStrategy {
    pub fn new(endpoint: Endpoint, config: ServerAssistedConfig) -> Self {
        Self {
            endpoint,
            config,
            client: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ServerAssistedConfig {
        &self.config
    }

    /// Keys currently held client-side.
    pub fn cached_keys(&self) -> usize {
        self.client.read().as_ref().map_or(0, |c| c.cache().len())
    }

    /// Invalidation notifications received from the store so far.
    pub fn invalidations_received(&self) -> u64 {
        self.client
            .read()
            .as_ref()
            .map_or(0, |c| c.cache().invalidations())
    }

    fn client(&self) -> Result<Arc<TrackingClient>, StrategyError> {
        self.client.read().clone().ok_or(StrategyError::NotRunning)
    }
}

#[async_trait]
impl CachingStrategy for ServerAssistedStrategy {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self) -> Result<(), StrategyError> {
        if self.client.read().is_some() {
            return Ok(());
        }

        let client = self.endpoint.connect_tracking(self.config.max_keys).await?;
        tracing::info!(
            strategy = NAME,
            endpoint = %self.endpoint,
            max_keys = self.config.max_keys,
            ttl_secs = self.config.ttl.as_secs(),
            "strategy initialized"
        );
        *self.client.write() = Some(Arc::new(client));
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Lookup, StrategyError> {
        let client = self.client()?;
        let read = client.get_cached(key, self.config.ttl).await?;
        match read.value {
            Some(value) => Ok(Lookup {
                value,
                hit: read.cache_hit,
            }),
            None => Err(StrategyError::KeyNotFound(key.to_string())),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StrategyError> {
        let client = self.client()?;
        client.set(key, value).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StrategyError> {
        let client = self.client.write().take();
        if let Some(client) = client {
            client.close();
            tracing::info!(
                strategy = NAME,
                invalidations = client.cache().invalidations(),
                "strategy closed"
            );
        }
        Ok(())
    }
}
