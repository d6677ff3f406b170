//! Caching strategies under benchmark.
//!
//! Every strategy implements [`CachingStrategy`]; the runner only ever talks to
//! the trait, so a new strategy needs a new [`StrategyKind`] variant and
//! nothing else.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{InvalidatedConfig, ServerAssistedConfig};
use crate::local_cache::Value;
use crate::store::{Endpoint, StoreError};

mod invalidated;
mod server_assisted;

pub use invalidated::{InvalidatedLocalStrategy, InvalidationMessage};
pub use server_assisted::ServerAssistedStrategy;

/// Errors raised by strategy operations.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("key '{0}' not found")]
    KeyNotFound(String),

    #[error("strategy is not running")]
    NotRunning,

    #[error("failed to encode invalidation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Value returned by a read, with whether it came from the local tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The value of the key at the time it was served
    pub value: Value,
    /// True when no store round trip was needed
    pub hit: bool,
}

impl Lookup {
    /// Value served from the local tier.
    pub fn hit(value: Value) -> Self {
        Self { value, hit: true }
    }

    /// Value fetched from the store.
    pub fn miss(value: Value) -> Self {
        Self { value, hit: false }
    }
}

/// A two-tier caching strategy.
///
/// `init` must succeed before `read` and `write` are called; `close` is
/// idempotent. `read` and `write` may be called concurrently from any number
/// of tasks.
#[async_trait]
pub trait CachingStrategy: Send + Sync {
    /// Human-readable name used in logs and reports.
    fn name(&self) -> &str;

    /// Opens connections and starts background tasks. Calling it on a running
    /// strategy is a no-op.
    async fn init(&mut self) -> Result<(), StrategyError>;

    /// Returns the value of `key`, from the local tier when possible.
    ///
    /// A key absent from the store is [`StrategyError::KeyNotFound`].
    async fn read(&self, key: &str) -> Result<Lookup, StrategyError>;

    /// Stores `value` under `key` and makes other instances drop stale copies.
    async fn write(&self, key: &str, value: &str) -> Result<(), StrategyError>;

    /// Stops background tasks and releases connections; later reads and
    /// writes fail with [`StrategyError::NotRunning`].
    async fn close(&self) -> Result<(), StrategyError>;
}

/// The available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Local cache kept coherent by pub/sub broadcasts
    InvalidatedLocal,
    /// Client cache kept coherent by server invalidation pushes
    ServerAssisted,
}

impl StrategyKind {
    pub fn all() -> [StrategyKind; 2] {
        [StrategyKind::InvalidatedLocal, StrategyKind::ServerAssisted]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::InvalidatedLocal => "invalidated",
            StrategyKind::ServerAssisted => "server-assisted",
        }
    }

    /// Builds an uninitialized strategy of this kind against `endpoint`.
    pub fn build(
        &self,
        endpoint: &Endpoint,
        settings: &StrategySettings,
    ) -> Box<dyn CachingStrategy> {
        match self {
            StrategyKind::InvalidatedLocal => Box::new(InvalidatedLocalStrategy::new(
                endpoint.clone(),
                settings.invalidated.clone(),
            )),
            StrategyKind::ServerAssisted => Box::new(ServerAssistedStrategy::new(
                endpoint.clone(),
                settings.server_assisted,
            )),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invalidated" | "local" | "pubsub" => Ok(StrategyKind::InvalidatedLocal),
            "server-assisted" | "csc" | "tracking" => Ok(StrategyKind::ServerAssisted),
            other => Err(format!(
                "unknown strategy '{}', expected 'invalidated' or 'server-assisted'",
                other
            )),
        }
    }
}

/// Per-strategy configuration used by [`StrategyKind::build`].
#[derive(Debug, Clone, Default)]
pub struct StrategySettings {
    pub invalidated: InvalidatedConfig,
    pub server_assisted: ServerAssistedConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "invalidated".parse::<StrategyKind>().unwrap(),
            StrategyKind::InvalidatedLocal
        );
        assert_eq!(
            "Server-Assisted".parse::<StrategyKind>().unwrap(),
            StrategyKind::ServerAssisted
        );
        assert!("lru".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in StrategyKind::all() {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_build_names() {
        let endpoint = Endpoint::Memory(crate::store::MemoryStore::new());
        let settings = StrategySettings::default();
        let names: Vec<String> = StrategyKind::all()
            .iter()
            .map(|kind| kind.build(&endpoint, &settings).name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Local L1 + Pub/Sub Invalidation",
                "Server-Assisted Client Cache"
            ]
        );
    }
}
