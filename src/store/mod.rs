//! Remote store access.
//!
//! The benchmark talks to a key-value store with publish/subscribe and
//! client-side tracking. Two backends are provided:
//!
//! - **TCP**: a Redis-compatible server. Commands and subscriptions go through
//!   the `redis` crate; the tracking connection speaks RESP3 itself (see
//!   [`Connection`]) because tracked replies and invalidation pushes must be
//!   applied to the client cache in stream order.
//! - **Memory**: an in-process [`MemoryStore`] with the same semantics
//!
//! Connection kinds are enums over the backends so callers stay backend
//! agnostic without dynamic dispatch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod client_cache;
mod connection;
mod memory;
mod remote;
pub mod resp;

pub use client_cache::ClientSideCache;
pub use memory::{MemoryStore, MemorySubscriber};

use crate::local_cache::Value;
pub use connection::Connection;
pub use remote::{RedisClient, RedisSubscriber};

/// Errors raised by store connections.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("connection closed")]
    Closed,
}

/// Message delivered to a channel subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Result of a tracked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRead {
    pub value: Option<Value>,
    /// True when the value came from the client-side cache
    pub cache_hit: bool,
}

/// Where the store lives.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// `host:port` of a RESP server
    Tcp(String),
    Memory(MemoryStore),
}

impl Endpoint {
    /// Parses `memory`, `redis://host:port` or `host:port`.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("memory") {
            return Ok(Endpoint::Memory(MemoryStore::new()));
        }
        let addr = s.strip_prefix("redis://").unwrap_or(s).trim_end_matches('/');
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(StoreError::InvalidEndpoint(s.to_string())),
        }
    }

    /// Opens a plain command connection.
    pub async fn connect(&self) -> Result<StoreClient, StoreError> {
        match self {
            Endpoint::Tcp(addr) => Ok(StoreClient::Tcp(RedisClient::connect(addr).await?)),
            Endpoint::Memory(store) => {
                store.check_available()?;
                Ok(StoreClient::Memory(store.clone()))
            }
        }
    }

    /// Opens a dedicated connection subscribed to `channel`.
    ///
    /// The subscription is confirmed before this returns, so messages published
    /// afterwards are delivered.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscriber, StoreError> {
        match self {
            Endpoint::Tcp(addr) => {
                Ok(Subscriber::Tcp(RedisSubscriber::connect(addr, channel).await?))
            }
            Endpoint::Memory(store) => Ok(Subscriber::Memory(store.subscribe(channel)?)),
        }
    }

    /// Opens a connection with client-side tracking enabled and a local cache of
    /// at most `max_keys` entries.
    pub async fn connect_tracking(&self, max_keys: usize) -> Result<TrackingClient, StoreError> {
        let cache = Arc::new(ClientSideCache::new(max_keys));
        match self {
            Endpoint::Tcp(addr) => {
                let conn = Connection::connect_tracking(addr, Arc::clone(&cache)).await?;
                Ok(TrackingClient::Tcp { conn, cache })
            }
            Endpoint::Memory(store) => {
                store.register_tracker(&cache)?;
                Ok(TrackingClient::Memory {
                    store: store.clone(),
                    cache,
                })
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "redis://{}", addr),
            Endpoint::Memory(_) => write!(f, "memory"),
        }
    }
}

/// Command connection. Clones share the underlying connection.
#[derive(Debug, Clone)]
pub enum StoreClient {
    Tcp(RedisClient),
    Memory(MemoryStore),
}

impl StoreClient {
    /// GET; `None` for a missing key.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self {
            StoreClient::Tcp(conn) => conn.get(key).await,
            StoreClient::Memory(store) => store.get(key).await,
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            StoreClient::Tcp(conn) => conn.set(key, value).await,
            StoreClient::Memory(store) => store.set(key, value).await,
        }
    }

    /// Publishes `message` and returns the number of receiving subscribers.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, StoreError> {
        match self {
            StoreClient::Tcp(conn) => conn.publish(channel, message).await,
            StoreClient::Memory(store) => store.publish(channel, message).await,
        }
    }

    /// Removes every key from the store.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        match self {
            StoreClient::Tcp(conn) => conn.flush_all().await,
            StoreClient::Memory(store) => store.flush_all().await,
        }
    }
}

/// Connection in subscriber mode.
#[derive(Debug)]
pub enum Subscriber {
    Tcp(RedisSubscriber),
    Memory(MemorySubscriber),
}

impl Subscriber {
    /// Waits for the next message; `None` once the subscription ended.
    ///
    /// Cancel safe: dropping the future loses no delivered message.
    pub async fn next_message(&mut self) -> Result<Option<PubSubMessage>, StoreError> {
        match self {
            Subscriber::Tcp(sub) => sub.next_message().await,
            Subscriber::Memory(sub) => sub.next_message().await,
        }
    }
}

/// Connection with server-assisted client caching.
#[derive(Debug)]
pub enum TrackingClient {
    Tcp {
        conn: Connection,
        cache: Arc<ClientSideCache>,
    },
    Memory {
        store: MemoryStore,
        cache: Arc<ClientSideCache>,
    },
}

impl TrackingClient {
    /// Reads `key`, serving it from the client-side cache when present and
    /// caching fetched values for `ttl`.
    pub async fn get_cached(&self, key: &str, ttl: Duration) -> Result<CachedRead, StoreError> {
        match self {
            TrackingClient::Tcp { conn, cache } => {
                if let Some(value) = cache.get(key) {
                    return Ok(CachedRead {
                        value: Some(value),
                        cache_hit: true,
                    });
                }
                let value = conn.get_tracked(key, ttl).await?;
                Ok(CachedRead {
                    value,
                    cache_hit: false,
                })
            }
            TrackingClient::Memory { store, cache } => store.get_tracked(cache, key, ttl).await,
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            TrackingClient::Tcp { conn, .. } => conn.set(key, value).await,
            TrackingClient::Memory { store, .. } => store.set(key, value).await,
        }
    }

    /// The client-side cache fed by this connection.
    pub fn cache(&self) -> &ClientSideCache {
        match self {
            TrackingClient::Tcp { cache, .. } | TrackingClient::Memory { cache, .. } => cache,
        }
    }

    /// Drops every cached entry and, over TCP, closes the connection.
    pub fn close(&self) {
        self.cache().invalidate_all();
        if let TrackingClient::Tcp { conn, .. } = self {
            conn.close();
        }
    }
}
