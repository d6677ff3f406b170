//! In-process key-value store.
//!
//! Implements the same command semantics as the remote store (GET, SET,
//! PUBLISH, SUBSCRIBE, FLUSHALL and tracked reads) without a network hop. An
//! optional per-command latency models the round trip. Fault switches make it
//! possible to exercise error and stall paths deterministically.
//!
//! Every subscriber owns an unbounded queue, so like a server-side client
//! output buffer a slow subscriber falls behind but never loses a message.
//! Commands yield to the scheduler even without latency, so subscriber tasks
//! keep up with publishers that never block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::client_cache::ClientSideCache;
use super::{CachedRead, PubSubMessage, StoreError};
use crate::local_cache::Value;

#[derive(Debug, Default)]
struct MemoryInner {
    data: RwLock<HashMap<String, Value>>,
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    trackers: Mutex<Vec<Weak<ClientSideCache>>>,
    latency_us: AtomicU64,
    unavailable: AtomicBool,
    stalled: AtomicBool,
    commands: AtomicU64,
}

/// Shared handle to an in-process store; clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose commands each take at least `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.set_latency(latency);
        store
    }

    pub fn set_latency(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.inner.latency_us.store(us, Ordering::Relaxed);
    }

    /// While set, new connections and commands fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// While set, commands never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::Relaxed);
    }

    /// Number of commands executed against the store.
    pub fn command_count(&self) -> u64 {
        self.inner.commands.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct read bypassing latency and fault injection.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.data.read().get(key).cloned()
    }

    pub(crate) fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory store unavailable",
            )));
        }
        Ok(())
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        if self.inner.stalled.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        self.check_available()?;
        let us = self.inner.latency_us.load(Ordering::Relaxed);
        if us > 0 {
            tokio::time::sleep(Duration::from_micros(us)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.inner.commands.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.round_trip().await?;
        Ok(self.peek(key))
    }

    pub(crate) async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut data = self.inner.data.write();
        data.insert(key.to_string(), Arc::from(value));
        // notify tracking clients while the write is still exclusive, so a
        // concurrent tracked read cannot cache the old value afterwards
        self.for_each_tracker(|cache| cache.invalidate(key));
        drop(data);
        Ok(())
    }

    pub(crate) async fn publish(&self, channel: &str, message: &str) -> Result<u64, StoreError> {
        self.round_trip().await?;
        let mut channels = self.inner.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };
        // dropped subscribers are pruned here
        subscribers.retain(|tx| tx.send(message.to_string()).is_ok());
        Ok(subscribers.len() as u64)
    }

    pub(crate) async fn flush_all(&self) -> Result<(), StoreError> {
        self.round_trip().await?;
        let mut data = self.inner.data.write();
        data.clear();
        self.for_each_tracker(ClientSideCache::invalidate_all);
        drop(data);
        Ok(())
    }

    pub(crate) fn subscribe(&self, channel: &str) -> Result<MemorySubscriber, StoreError> {
        self.check_available()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(MemorySubscriber {
            channel: channel.to_string(),
            receiver,
        })
    }

    pub(crate) fn register_tracker(&self, cache: &Arc<ClientSideCache>) -> Result<(), StoreError> {
        self.check_available()?;
        self.inner.trackers.lock().push(Arc::downgrade(cache));
        Ok(())
    }

    pub(crate) async fn get_tracked(
        &self,
        cache: &ClientSideCache,
        key: &str,
        ttl: Duration,
    ) -> Result<CachedRead, StoreError> {
        if let Some(value) = cache.get(key) {
            return Ok(CachedRead {
                value: Some(value),
                cache_hit: true,
            });
        }

        self.round_trip().await?;
        let data = self.inner.data.read();
        let value = data.get(key).cloned();
        if let Some(value) = &value {
            cache.insert(key.to_string(), Arc::clone(value), ttl);
        }
        drop(data);

        Ok(CachedRead {
            value,
            cache_hit: false,
        })
    }

    fn for_each_tracker(&self, f: impl Fn(&ClientSideCache)) {
        let mut trackers = self.inner.trackers.lock();
        trackers.retain(|weak| match weak.upgrade() {
            Some(cache) => {
                f(&cache);
                true
            }
            None => false,
        });
    }
}

/// Subscription to one channel of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySubscriber {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl MemorySubscriber {
    pub(crate) async fn next_message(&mut self) -> Result<Option<PubSubMessage>, StoreError> {
        let message = self.receiver.recv().await.map(|payload| PubSubMessage {
            channel: self.channel.clone(),
            payload,
        });
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_flush() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        store.flush_all().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.command_count(), 4);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("ch", "nobody").await.unwrap(), 0);

        let mut sub = store.subscribe("ch").unwrap();
        assert_eq!(store.publish("ch", "hello").await.unwrap(), 1);
        let msg = sub.next_message().await.unwrap().unwrap();
        assert_eq!(msg.channel, "ch");
        assert_eq!(msg.payload, "hello");
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_nothing() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("ch").unwrap();
        for i in 0..10_000 {
            assert_eq!(store.publish("ch", &i.to_string()).await.unwrap(), 1);
        }
        for i in 0..10_000 {
            let msg = sub.next_message().await.unwrap().unwrap();
            assert_eq!(msg.payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let store = MemoryStore::new();
        let kept = store.subscribe("ch").unwrap();
        drop(store.subscribe("ch").unwrap());
        assert_eq!(store.publish("ch", "a").await.unwrap(), 1);
        drop(kept);
        assert_eq!(store.publish("ch", "b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tracked_reads_invalidated_by_writes() {
        let store = MemoryStore::new();
        store.set("k", "v1").await.unwrap();

        let cache = Arc::new(ClientSideCache::new(16));
        store.register_tracker(&cache).unwrap();

        let first = store.get_tracked(&cache, "k", Duration::from_secs(60)).await.unwrap();
        assert!(!first.cache_hit);
        let second = store.get_tracked(&cache, "k", Duration::from_secs(60)).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.value.as_deref(), Some("v1"));

        store.set("k", "v2").await.unwrap();
        let third = store.get_tracked(&cache, "k", Duration::from_secs(60)).await.unwrap();
        assert!(!third.cache_hit);
        assert_eq!(third.value.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.get("a").await, Err(StoreError::Io(_))));
        assert!(store.subscribe("ch").is_err());
        store.set_unavailable(false);
        assert!(store.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_tracker_is_pruned() {
        let store = MemoryStore::new();
        {
            let cache = Arc::new(ClientSideCache::new(4));
            store.register_tracker(&cache).unwrap();
        }
        store.set("k", "v").await.unwrap();
        assert!(store.inner.trackers.lock().is_empty());
    }
}
