//! Configuration for local caches, caching strategies and the benchmark runner.
//!
//! Every configuration type follows the same pattern: a constructor taking the
//! required parameters, sensible defaults for everything else, and `with_*`
//! builder methods for overrides.
//!
//! ```
//! use std::time::Duration;
//! use tierbench::config::{InvalidatedConfig, LocalCacheConfig, RunnerConfig};
//!
//! let local = LocalCacheConfig::new(64 * 1024 * 1024).with_segments(8);
//! let strategy = InvalidatedConfig::new(local)
//!     .with_invalidation_delay(Duration::from_millis(5));
//! let runner = RunnerConfig::new(32, 1024).with_op_timeout(None);
//! assert_eq!(strategy.local_cache.segments, 8);
//! assert!(runner.op_timeout.is_none());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::workload::Seed;

/// Default number of segments for the local cache.
pub const DEFAULT_SEGMENT_COUNT: usize = 16;

/// Channel carrying invalidation broadcasts.
pub const INVALIDATION_CHANNEL: &str = "cache-invalidation";

/// Default client-side TTL attached to tracked reads.
pub const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(10 * 60);

/// Per-key overhead assumed when converting a byte budget to a key count.
pub const KEY_OVERHEAD_BYTES: usize = 50;

/// Eviction policy backing the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCachePolicy {
    /// Segmented Greedy-Dual-Size-Frequency (priority = age + frequency / cost)
    #[default]
    Gdsf,
    /// moka TinyLFU with a byte weigher
    Moka,
}

impl LocalCachePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalCachePolicy::Gdsf => "GDSF",
            LocalCachePolicy::Moka => "Moka",
        }
    }
}

impl fmt::Display for LocalCachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LocalCachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gdsf" => Ok(LocalCachePolicy::Gdsf),
            "moka" => Ok(LocalCachePolicy::Moka),
            other => Err(format!("unknown local cache policy '{other}', expected 'gdsf' or 'moka'")),
        }
    }
}

/// Configuration for the cost-bounded local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCacheConfig {
    /// Maximum cumulative cost (value bytes) held by the cache
    pub max_cost: u64,
    /// Number of independently locked segments; the cost budget is split evenly
    pub segments: usize,
    pub policy: LocalCachePolicy,
}

impl LocalCacheConfig {
    pub fn new(max_cost: u64) -> Self {
        Self {
            max_cost,
            segments: DEFAULT_SEGMENT_COUNT,
            policy: LocalCachePolicy::default(),
        }
    }

    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments.max(1);
        self
    }

    pub fn with_policy(mut self, policy: LocalCachePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        // 1 GiB
        Self::new(1 << 30)
    }
}

/// Configuration for the invalidated local+remote strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidatedConfig {
    pub local_cache: LocalCacheConfig,
    pub channel: String,
    /// Hold-off applied by the listener before evicting an invalidated key.
    ///
    /// Zero by default. A non-zero value widens the read-after-write window
    /// deliberately.
    pub invalidation_delay: Duration,
    /// Upper bound on how long `close` waits for the listener to exit
    pub shutdown_timeout: Duration,
}

impl InvalidatedConfig {
    pub fn new(local_cache: LocalCacheConfig) -> Self {
        Self {
            local_cache,
            channel: INVALIDATION_CHANNEL.to_string(),
            invalidation_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_invalidation_delay(mut self, delay: Duration) -> Self {
        self.invalidation_delay = delay;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for InvalidatedConfig {
    fn default() -> Self {
        Self::new(LocalCacheConfig::default())
    }
}

/// Configuration for the server-assisted client cache strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAssistedConfig {
    /// Maximum number of keys cached on the client connection
    pub max_keys: usize,
    /// Client-side TTL for tracked reads
    pub ttl: Duration,
}

impl ServerAssistedConfig {
    pub fn new(max_keys: usize) -> Self {
        Self {
            max_keys: max_keys.max(1),
            ttl: DEFAULT_CLIENT_TTL,
        }
    }

    /// Derives the key budget from a byte budget and the expected value size.
    pub fn from_budget(budget_bytes: u64, value_size: usize) -> Self {
        let per_key = (value_size + KEY_OVERHEAD_BYTES) as u64;
        Self::new((budget_bytes / per_key) as usize)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for ServerAssistedConfig {
    fn default() -> Self {
        // 1 GiB of 1 KiB values
        Self::from_budget(1 << 30, 1024)
    }
}

/// Configuration for a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of parallel workers
    pub concurrency: usize,
    /// Size in bytes of the payload each worker writes
    pub value_size: usize,
    /// Deadline for each strategy call; `None` waits indefinitely
    pub op_timeout: Option<Duration>,
    /// Seed for the per-worker write payloads
    pub seed: Seed,
    /// Log progress every this many completed operations (0 disables)
    pub progress_interval: u64,
}

impl RunnerConfig {
    pub fn new(concurrency: usize, value_size: usize) -> Self {
        Self {
            concurrency,
            value_size,
            op_timeout: Some(Duration::from_secs(10)),
            seed: Seed::Clock,
            progress_interval: 0,
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Option<Duration>) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_to_key_count() {
        let config = ServerAssistedConfig::from_budget(1 << 30, 64);
        assert_eq!(config.max_keys, (1usize << 30) / 114);

        // never zero
        assert_eq!(ServerAssistedConfig::from_budget(10, 1024).max_keys, 1);
    }

    #[test]
    fn test_segments_floor() {
        assert_eq!(LocalCacheConfig::new(1024).with_segments(0).segments, 1);
    }

    #[test]
    fn test_defaults() {
        let config = InvalidatedConfig::default();
        assert_eq!(config.channel, INVALIDATION_CHANNEL);
        assert_eq!(config.invalidation_delay, Duration::ZERO);
        assert_eq!(config.local_cache.policy, LocalCachePolicy::Gdsf);
    }
}
