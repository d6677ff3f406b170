#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────┐   operations   ┌──────────────┐   read/write   ┌──────────────────────┐
//! │   workload   │───────────────▶│    runner    │───────────────▶│ strategy (trait obj) │
//! └──────────────┘                └──────┬───────┘                └──────────┬───────────┘
//!                                        │ outcomes                          │
//!                                        ▼                                   ▼
//!                                 ┌──────────────┐              ┌─────────────────────────┐
//!                                 │    stats     │              │ local_cache │   store   │
//!                                 └──────────────┘              └─────────────────────────┘
//! ```
//!
//! | Module | Role |
//! |--------|------|
//! | [`workload`] | Uniform or Zipf key sequences with a read/write mix |
//! | [`strategy`] | [`CachingStrategy`] and its two implementations |
//! | [`local_cache`] | Cost-bounded in-process cache used as the L1 tier |
//! | [`store`] | Redis client and subscriber, RESP3 tracking connection, in-process store |
//! | [`runner`] | Concurrent execution engine |
//! | [`stats`] | Hit rate, throughput and latency aggregation |

/// Synthetic workload generation.
pub mod workload;

/// Configuration structures for caches, strategies and runs.
pub mod config;

/// Segmented, cost-aware local cache.
///
/// Provides the L1 tier of the invalidated strategy: a Greedy-Dual-Size-Frequency
/// cache partitioned into independently locked segments, plus a moka-backed
/// alternative.
pub mod local_cache;

/// Result and outcome types.
pub mod models;

/// Outcome aggregation.
pub mod stats;

/// Remote store connections and the in-process store.
pub mod store;

/// Caching strategies.
pub mod strategy;

/// Benchmark execution engine.
pub mod runner;

pub use config::{
    InvalidatedConfig, LocalCacheConfig, LocalCachePolicy, RunnerConfig, ServerAssistedConfig,
};
pub use local_cache::{CostCache, LocalCache, Value};
pub use models::{BenchmarkResult, Classification, LatencySummary, OperationOutcome};
pub use runner::{Runner, RunnerError, WorkQueue};
pub use store::{Endpoint, MemoryStore, StoreError};
pub use strategy::{
    CachingStrategy, InvalidatedLocalStrategy, Lookup, ServerAssistedStrategy, StrategyError,
    StrategyKind, StrategySettings,
};
pub use workload::{generate, KeyDistribution, OpKind, Operation, Seed, WorkloadConfig};
