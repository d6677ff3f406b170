//! Local cache in front of the remote store, kept coherent by pub/sub.
//!
//! Reads are served from a bounded in-process cache and fall through to the
//! store on a miss. Writes go to the store and then broadcast the key on the
//! invalidation channel; every instance (the writer included) evicts the key
//! when its listener receives the broadcast. Until then the writer itself may
//! still serve the previous value. That read-after-write window is inherent to
//! the design and can be widened with
//! [`InvalidatedConfig::invalidation_delay`].
//!
//! A read that misses fetches from the store and then populates the local
//! cache. If an invalidation for the key lands while that fetch is in flight,
//! the fetched value may already be outdated; the read notices through a
//! per-key epoch and drops what it cached instead of pinning a stale entry
//! until the next write.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CachingStrategy, Lookup, StrategyError};
use crate::config::InvalidatedConfig;
use crate::local_cache::LocalCache;
use crate::store::{Endpoint, StoreClient, Subscriber};

const NAME: &str = "Local L1 + Pub/Sub Invalidation";

/// Payload broadcast on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub key: String,
}

const EPOCH_STRIPES: usize = 256;

/// Invalidation counters, one per stripe of the key space.
///
/// The listener advances a key's stripe before evicting it; a read samples the
/// stripe before fetching and checks it again after populating. Keys sharing a
/// stripe only cost a spurious re-fetch.
struct InvalidationEpochs {
    stripes: Box<[AtomicU64]>,
    hasher: RandomState,
}

impl InvalidationEpochs {
    fn new() -> Self {
        Self {
            stripes: (0..EPOCH_STRIPES).map(|_| AtomicU64::new(0)).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe(&self, key: &str) -> &AtomicU64 {
        let idx = self.hasher.hash_one(key) as usize % self.stripes.len();
        &self.stripes[idx]
    }

    fn current(&self, key: &str) -> u64 {
        self.stripe(key).load(Ordering::SeqCst)
    }

    fn advance(&self, key: &str) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }
}

struct Running {
    local: Arc<LocalCache>,
    epochs: Arc<InvalidationEpochs>,
    client: RwLock<Option<StoreClient>>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Running {
    fn client(&self) -> Result<StoreClient, StrategyError> {
        self.client.read().clone().ok_or(StrategyError::NotRunning)
    }
}

/// Invalidated local+remote strategy.
pub struct InvalidatedLocalStrategy {
    endpoint: Endpoint,
    config: InvalidatedConfig,
    running: Option<Running>,
    applied: Arc<AtomicU64>,
    listening: Arc<AtomicBool>,
}

impl InvalidatedLocalStrategy {
    pub fn new(endpoint: Endpoint, config: InvalidatedConfig) -> Self {
        Self {
            endpoint,
            config,
            running: None,
            applied: Arc::new(AtomicU64::new(0)),
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &InvalidatedConfig {
        &self.config
    }

    /// Number of invalidations the listener has applied to the local cache.
    pub fn invalidations_applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Whether the background listener task is still running.
    pub fn listener_active(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Entries currently held by the local cache.
    pub fn local_len(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.local.len())
    }

    fn running(&self) -> Result<&Running, StrategyError> {
        match &self.running {
            Some(running) if !running.closed.load(Ordering::Acquire) => Ok(running),
            _ => Err(StrategyError::NotRunning),
        }
    }
}

#[async_trait]
impl CachingStrategy for InvalidatedLocalStrategy {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self) -> Result<(), StrategyError> {
        if self.running().is_ok() {
            return Ok(());
        }

        let local = Arc::new(LocalCache::from_config(&self.config.local_cache));
        let epochs = Arc::new(InvalidationEpochs::new());
        let client = self.endpoint.connect().await?;
        let subscriber = self.endpoint.subscribe(&self.config.channel).await?;

        let shutdown = CancellationToken::new();
        self.listening.store(true, Ordering::Release);
        let listener = tokio::spawn(listen(
            subscriber,
            Arc::clone(&local),
            Arc::clone(&epochs),
            shutdown.clone(),
            self.config.invalidation_delay,
            Arc::clone(&self.applied),
            ListeningGuard(Arc::clone(&self.listening)),
        ));

        tracing::info!(
            strategy = NAME,
            endpoint = %self.endpoint,
            channel = %self.config.channel,
            policy = %self.config.local_cache.policy,
            max_cost = self.config.local_cache.max_cost,
            "strategy initialized"
        );

        self.running = Some(Running {
            local,
            epochs,
            client: RwLock::new(Some(client)),
            shutdown,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        });
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Lookup, StrategyError> {
        let running = self.running()?;
        if let Some(value) = running.local.get(key) {
            return Ok(Lookup::hit(value));
        }

        let epoch = running.epochs.current(key);
        match running.client()?.get(key).await? {
            Some(value) => {
                running
                    .local
                    .insert(key.to_string(), Arc::clone(&value), value.len() as u64);
                // invalidated while in flight: the listener may already have
                // evicted before our insert
                if running.epochs.current(key) != epoch {
                    running.local.remove(key);
                }
                Ok(Lookup::miss(value))
            }
            None => Err(StrategyError::KeyNotFound(key.to_string())),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StrategyError> {
        let client = self.running()?.client()?;
        client.set(key, value).await?;

        // the local entry is left alone; our own listener evicts it when the
        // broadcast comes back
        let message = serde_json::to_string(&InvalidationMessage {
            key: key.to_string(),
        })?;
        client.publish(&self.config.channel, &message).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StrategyError> {
        let Some(running) = &self.running else {
            return Ok(());
        };
        if running.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        running.shutdown.cancel();
        let listener = running.listener.lock().take();
        if let Some(mut handle) = listener {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(strategy = NAME, error = %e, "listener task failed"),
                Err(_) => {
                    tracing::warn!(
                        strategy = NAME,
                        timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                        "listener did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        running.local.clear();
        // in-flight calls hold their own handle; the socket goes with the last one
        running.client.write().take();
        tracing::info!(
            strategy = NAME,
            invalidations = self.invalidations_applied(),
            "strategy closed"
        );
        Ok(())
    }
}

/// Clears the listening flag however the listener future ends, abort included.
struct ListeningGuard(Arc<AtomicBool>);

impl Drop for ListeningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn listen(
    mut subscriber: Subscriber,
    local: Arc<LocalCache>,
    epochs: Arc<InvalidationEpochs>,
    shutdown: CancellationToken,
    delay: Duration,
    applied: Arc<AtomicU64>,
    _guard: ListeningGuard,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscriber.next_message() => message,
        };

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => {
                if !shutdown.is_cancelled() {
                    tracing::warn!(
                        strategy = NAME,
                        "invalidation subscription ended, local entries are no longer invalidated"
                    );
                }
                break;
            }
            Err(e) => {
                tracing::warn!(strategy = NAME, error = %e, "invalidation listener failed");
                break;
            }
        };

        let key = match serde_json::from_str::<InvalidationMessage>(&message.payload) {
            Ok(InvalidationMessage { key }) if !key.is_empty() => key,
            Ok(_) => {
                tracing::debug!(strategy = NAME, "dropping invalidation with empty key");
                continue;
            }
            Err(e) => {
                tracing::debug!(
                    strategy = NAME,
                    error = %e,
                    payload = %message.payload,
                    "dropping malformed invalidation"
                );
                continue;
            }
        };

        if !delay.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        epochs.advance(&key);
        local.remove(&key);
        applied.fetch_add(1, Ordering::AcqRel);
    }
}
