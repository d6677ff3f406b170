//! Concurrent benchmark engine.
//!
//! A run initializes the strategy, loads the pre-generated operations into a
//! closed [`WorkQueue`] and lets `concurrency` worker tasks drain it. Each
//! worker times every strategy call individually and keeps its own outcome
//! list, which is handed back through the join handle. Workers also count into
//! a shared [`OutcomeTally`] that can be watched while the run is in progress.
//! The strategy is closed once every worker has finished, whatever happened to
//! them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::config::RunnerConfig;
use crate::models::{BenchmarkResult, Classification, OperationOutcome};
use crate::stats::{summarize, OutcomeTally};
use crate::strategy::{CachingStrategy, StrategyError};
use crate::workload::{random_payload, OpKind, Operation};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid runner configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize strategy '{strategy}': {source}")]
    Init {
        strategy: String,
        #[source]
        source: StrategyError,
    },

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Bounded multi-consumer queue of operations.
///
/// Producers push until [`close`](WorkQueue::close); consumers pop until the
/// queue is closed and drained.
#[derive(Debug)]
pub struct WorkQueue {
    items: ArrayQueue<Operation>,
    closed: AtomicBool,
}

impl WorkQueue {
    /// Open, empty queue holding at most `capacity` operations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue holding exactly `operations`, already closed.
    pub fn load(operations: &[Operation]) -> Self {
        let queue = Self::with_capacity(operations.len());
        for op in operations {
            let pushed = queue.push(op.clone());
            debug_assert!(pushed.is_ok(), "queue sized to fit every operation");
        }
        queue.close();
        queue
    }

    /// Hands `op` back when the queue is closed or full.
    pub fn push(&self, op: Operation) -> Result<(), Operation> {
        if self.is_closed() {
            return Err(op);
        }
        self.items.push(op)
    }

    /// Rejects further pushes; queued operations can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Takes the next operation. `None` does not mean the queue is finished
    /// unless it is also closed.
    pub fn pop(&self) -> Option<Operation> {
        self.items.pop()
    }

    /// True once the queue is closed and every operation was handed out.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.items.is_empty()
    }

    /// Operations still queued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct Worker {
    index: usize,
    strategy: Arc<dyn CachingStrategy>,
    queue: Arc<WorkQueue>,
    tally: Arc<OutcomeTally>,
    total: u64,
    seed: u64,
    config: RunnerConfig,
}

impl Worker {
    async fn run(self) -> Vec<OperationOutcome> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.index as u64));
        let payload = random_payload(self.config.value_size, &mut rng);
        let mut outcomes = Vec::with_capacity(self.queue.len() / self.config.concurrency + 1);

        loop {
            let Some(op) = self.queue.pop() else {
                if self.queue.is_finished() {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            };

            let start = Instant::now();
            let classification = self.execute(&op, &payload).await;
            outcomes.push(OperationOutcome::new(start.elapsed(), classification));

            let done = self.tally.record(classification);
            let interval = self.config.progress_interval;
            if interval > 0 && done % interval == 0 {
                let counts = self.tally.snapshot();
                tracing::info!(
                    completed = done,
                    total = self.total,
                    errors = counts.errors,
                    hit_rate = counts.hit_rate(),
                    "progress"
                );
            }
        }

        outcomes
    }

    async fn execute(&self, op: &Operation, payload: &str) -> Classification {
        let deadline = self.config.op_timeout;
        let result = match op.kind {
            OpKind::Read => bounded(deadline, self.strategy.read(&op.key))
                .await
                .map(|lookup| {
                    if lookup.hit {
                        Classification::Hit
                    } else {
                        Classification::Miss
                    }
                }),
            OpKind::Write => bounded(deadline, self.strategy.write(&op.key, payload))
                .await
                .map(|()| Classification::Write),
        };

        result.unwrap_or_else(|reason| {
            tracing::debug!(
                worker = self.index,
                op = op.kind.as_str(),
                key = %op.key,
                %reason,
                "operation failed"
            );
            Classification::Error
        })
    }
}

/// Awaits `call`, giving up after `deadline`.
async fn bounded<T>(
    deadline: Option<Duration>,
    call: impl Future<Output = Result<T, StrategyError>>,
) -> Result<T, String> {
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, call).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", deadline)),
        },
        None => call.await.map_err(|e| e.to_string()),
    }
}

/// Drives one strategy through one workload.
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    /// Runner that executes workloads with `config`.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `operations` against `strategy` and aggregates the outcomes.
    ///
    /// The strategy is initialized first; if that fails no operation is
    /// executed. After the workers finish the strategy is always closed, and
    /// a failure to close is logged without affecting the result.
    pub async fn run(
        &self,
        strategy: Box<dyn CachingStrategy>,
        operations: &[Operation],
    ) -> Result<BenchmarkResult, RunnerError> {
        self.run_with_tally(strategy, operations, Arc::new(OutcomeTally::new()))
            .await
    }

    /// Like [`run`](Runner::run), counting every outcome into `tally` as it
    /// completes so callers can observe the run live.
    pub async fn run_with_tally(
        &self,
        mut strategy: Box<dyn CachingStrategy>,
        operations: &[Operation],
        tally: Arc<OutcomeTally>,
    ) -> Result<BenchmarkResult, RunnerError> {
        if self.config.concurrency == 0 {
            return Err(RunnerError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let name = strategy.name().to_string();
        strategy
            .init()
            .await
            .map_err(|source| RunnerError::Init {
                strategy: name.clone(),
                source,
            })?;
        let strategy: Arc<dyn CachingStrategy> = Arc::from(strategy);

        let total = operations.len() as u64;
        let queue = Arc::new(WorkQueue::load(operations));
        let seed = self.config.seed.resolve();

        tracing::info!(
            strategy = %name,
            operations = total,
            concurrency = self.config.concurrency,
            "starting benchmark run"
        );

        let start = Instant::now();
        let handles: Vec<_> = (0..self.config.concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    strategy: Arc::clone(&strategy),
                    queue: Arc::clone(&queue),
                    tally: Arc::clone(&tally),
                    total,
                    seed,
                    config: self.config,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let joined = futures::future::join_all(handles).await;
        let duration = start.elapsed();

        if let Err(e) = strategy.close().await {
            tracing::warn!(strategy = %name, error = %e, "failed to close strategy");
        }

        let mut outcomes = Vec::with_capacity(operations.len());
        for worker in joined {
            outcomes.extend(worker?);
        }

        let result = summarize(&name, total, duration, &outcomes);
        tracing::info!(
            strategy = %name,
            hits = result.hits,
            misses = result.misses,
            writes = result.writes,
            errors = result.errors,
            hit_rate = result.hit_rate,
            ops_per_second = result.ops_per_second,
            duration_ms = duration.as_millis() as u64,
            "benchmark run finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_yields_each_operation_once() {
        let ops: Vec<Operation> = (0..100).map(|i| Operation::read(format!("k{}", i))).collect();
        let queue = WorkQueue::load(&ops);
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 100);

        let mut seen = Vec::new();
        while let Some(op) = queue.pop() {
            seen.push(op);
        }
        assert_eq!(seen, ops);
        assert!(queue.is_finished());
    }

    #[test]
    fn test_push_after_close_rejected() {
        let queue = WorkQueue::with_capacity(2);
        assert!(queue.push(Operation::write("a")).is_ok());
        queue.close();
        assert_eq!(queue.push(Operation::write("b")), Err(Operation::write("b")));
        assert!(!queue.is_finished());
    }

    #[test]
    fn test_empty_queue_is_finished() {
        let queue = WorkQueue::load(&[]);
        assert!(queue.is_finished());
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_bounded_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StrategyError>(())
        };
        let err = bounded(Some(Duration::from_millis(10)), slow).await.unwrap_err();
        assert!(err.contains("timed out"));

        let fast = async { Ok::<_, StrategyError>(7) };
        assert_eq!(bounded(None, fast).await, Ok(7));
    }
}
