//! Runner Tests
//!
//! End-to-end runs against the in-process store: outcome accounting, init
//! failures, per-operation deadlines and configuration errors.

use std::sync::Arc;
use std::time::Duration;

use tierbench::config::{RunnerConfig, ServerAssistedConfig};
use tierbench::runner::{Runner, RunnerError};
use tierbench::stats::OutcomeTally;
use tierbench::store::{Endpoint, MemoryStore};
use tierbench::strategy::{ServerAssistedStrategy, StrategyKind, StrategySettings};
use tierbench::workload::{generate, key_name, KeyDistribution, Seed, WorkloadConfig};

async fn populated_store(keys: usize) -> MemoryStore {
    let store = MemoryStore::new();
    let client = Endpoint::Memory(store.clone()).connect().await.unwrap();
    for i in 0..keys {
        client.set(&key_name(i), "seed-value").await.unwrap();
    }
    store
}

fn workload(ops: usize, keys: usize, read_ratio: f64) -> WorkloadConfig {
    WorkloadConfig::new(ops, keys)
        .with_read_ratio(read_ratio)
        .with_distribution(KeyDistribution::default())
        .with_seed(Seed::Fixed(42))
}

// ============================================================================
// OUTCOME ACCOUNTING
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_operation_is_accounted() {
    let store = populated_store(200).await;
    let endpoint = Endpoint::Memory(store);
    let ops = generate(&workload(5_000, 200, 0.8)).unwrap();
    let settings = StrategySettings::default();

    for kind in StrategyKind::all() {
        let runner = Runner::new(RunnerConfig::new(8, 32).with_seed(Seed::Fixed(7)));
        let result = runner.run(kind.build(&endpoint, &settings), &ops).await.unwrap();

        assert_eq!(result.total_operations, 5_000, "{kind}");
        assert_eq!(result.accounted(), 5_000, "{kind}");
        assert_eq!(result.latencies.len(), 5_000, "{kind}");
        assert_eq!(result.errors, 0, "{kind}");
        assert!(result.writes > 0, "{kind}");
        assert!(result.hits > 0, "{kind}");
        assert!(result.latencies.windows(2).all(|w| w[0] <= w[1]));
        assert!(result.ops_per_second > 0.0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_tally_agrees_with_result() {
    let store = populated_store(100).await;
    let endpoint = Endpoint::Memory(store);
    let ops = generate(&workload(2_000, 100, 0.7)).unwrap();
    let tally = Arc::new(OutcomeTally::new());

    let runner = Runner::new(RunnerConfig::new(8, 32).with_seed(Seed::Fixed(3)));
    let strategy = StrategyKind::InvalidatedLocal.build(&endpoint, &StrategySettings::default());
    let result = runner
        .run_with_tally(strategy, &ops, Arc::clone(&tally))
        .await
        .unwrap();

    let counts = tally.snapshot();
    assert_eq!(counts.total(), 2_000);
    assert_eq!(counts.hits, result.hits);
    assert_eq!(counts.misses, result.misses);
    assert_eq!(counts.writes, result.writes);
    assert_eq!(counts.errors, result.errors);
}

#[tokio::test]
async fn test_empty_workload() {
    let store = populated_store(1).await;
    let runner = Runner::new(RunnerConfig::new(4, 16));
    let strategy = Box::new(ServerAssistedStrategy::new(
        Endpoint::Memory(store),
        ServerAssistedConfig::new(10),
    ));

    let result = runner.run(strategy, &[]).await.unwrap();
    assert_eq!(result.accounted(), 0);
    assert_eq!(result.hit_rate, 0.0);
    assert!(result.latencies.is_empty());
}

#[tokio::test]
async fn test_missing_key_counts_as_error() {
    let store = MemoryStore::new();
    let ops = generate(&workload(50, 5, 1.0)).unwrap();
    let runner = Runner::new(RunnerConfig::new(2, 16));

    let strategy = StrategyKind::InvalidatedLocal
        .build(&Endpoint::Memory(store), &StrategySettings::default());
    let result = runner.run(strategy, &ops).await.unwrap();
    assert_eq!(result.errors, 50);
    assert_eq!(result.hits + result.misses, 0);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_init_failure_runs_nothing() {
    let store = populated_store(10).await;
    store.set_unavailable(true);
    let commands_before = store.command_count();
    let ops = generate(&workload(100, 10, 0.9)).unwrap();

    for kind in StrategyKind::all() {
        let runner = Runner::new(RunnerConfig::new(4, 16));
        let err = runner
            .run(
                kind.build(&Endpoint::Memory(store.clone()), &StrategySettings::default()),
                &ops,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Init { .. }), "{kind}: {err}");
    }
    assert_eq!(store.command_count(), commands_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_store_times_out_every_operation() {
    let store = populated_store(10).await;
    store.set_stalled(true);
    let ops = generate(&workload(20, 10, 0.5)).unwrap();

    for kind in StrategyKind::all() {
        let runner = Runner::new(
            RunnerConfig::new(4, 16).with_op_timeout(Some(Duration::from_millis(20))),
        );
        let result = runner
            .run(
                kind.build(&Endpoint::Memory(store.clone()), &StrategySettings::default()),
                &ops,
            )
            .await
            .unwrap();

        assert_eq!(result.errors, 20, "{kind}");
        assert_eq!(result.accounted(), 20, "{kind}");
        assert!(result.latency.min >= Duration::from_millis(20), "{kind}");
    }
}

#[tokio::test]
async fn test_zero_concurrency_rejected() {
    let store = populated_store(1).await;
    let runner = Runner::new(RunnerConfig::new(0, 16));
    let strategy = StrategyKind::ServerAssisted
        .build(&Endpoint::Memory(store.clone()), &StrategySettings::default());

    let err = runner.run(strategy, &[]).await.unwrap_err();
    assert!(matches!(err, RunnerError::InvalidConfig(_)));
}
