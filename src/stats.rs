//! Statistics aggregation for benchmark runs.
//!
//! Workers report one [`OperationOutcome`] per operation. While a run is in
//! progress they also record into a shared [`OutcomeTally`], which backs
//! progress reporting; [`summarize`] reduces the raw outcomes of a finished
//! run into a [`BenchmarkResult`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::{BenchmarkResult, Classification, LatencySummary, OperationOutcome};

/// Percentiles are reported only for sample counts above this threshold.
pub const MIN_PERCENTILE_SAMPLES: usize = 20;

/// Race-free per-class counters shared by concurrent workers.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    recorded: AtomicU64,
}

/// Point-in-time copy of an [`OutcomeTally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl TallySnapshot {
    pub fn total(&self) -> u64 {
        self.hits + self.misses + self.writes + self.errors
    }

    /// hits / (hits + misses); zero when no read completed
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads > 0 {
            self.hits as f64 / reads as f64
        } else {
            0.0
        }
    }
}

impl OutcomeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_outcomes(outcomes: &[OperationOutcome]) -> Self {
        let tally = Self::new();
        for outcome in outcomes {
            tally.record(outcome.classification);
        }
        tally
    }

    /// Counts one outcome and returns how many were recorded so far.
    #[inline]
    pub fn record(&self, classification: Classification) -> u64 {
        let counter = match classification {
            Classification::Hit => &self.hits,
            Classification::Miss => &self.misses,
            Classification::Write => &self.writes,
            Classification::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.recorded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Operations per second; zero for a zero-length run.
pub fn ops_per_second(total_operations: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        total_operations as f64 / secs
    } else {
        0.0
    }
}

/// Value at `floor(quantile * len)` of an ascending slice, or zero when there
/// are too few samples.
pub fn percentile(sorted: &[Duration], quantile: f64) -> Duration {
    if sorted.len() <= MIN_PERCENTILE_SAMPLES {
        return Duration::ZERO;
    }
    let idx = ((quantile * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Summarises an ascending latency slice.
pub fn latency_summary(sorted: &[Duration]) -> LatencySummary {
    if sorted.is_empty() {
        return LatencySummary::default();
    }

    // nanosecond sums cannot overflow for any realistic sample count
    let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
    LatencySummary {
        average: from_nanos(total / sorted.len() as u128),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(sorted, 0.50),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
    }
}

fn from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    // always below one second, so it fits
    let subsec = (nanos % NANOS_PER_SEC) as u32;
    Duration::new(secs, subsec)
}

/// Reduces the raw outcomes of a run into its aggregate result.
pub fn summarize(
    strategy_name: &str,
    total_operations: u64,
    duration: Duration,
    outcomes: &[OperationOutcome],
) -> BenchmarkResult {
    let counts = OutcomeTally::from_outcomes(outcomes).snapshot();

    let mut latencies: Vec<Duration> = outcomes.iter().map(|o| o.latency).collect();
    latencies.sort_unstable();
    let latency = latency_summary(&latencies);

    BenchmarkResult {
        strategy_name: strategy_name.to_string(),
        total_operations,
        hits: counts.hits,
        misses: counts.misses,
        writes: counts.writes,
        errors: counts.errors,
        duration,
        hit_rate: counts.hit_rate(),
        ops_per_second: ops_per_second(total_operations, duration),
        latencies,
        latency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(counts: &[(Classification, usize)]) -> Vec<OperationOutcome> {
        let mut out = Vec::new();
        for &(class, n) in counts {
            for i in 0..n {
                out.push(OperationOutcome::new(Duration::from_micros(i as u64 + 1), class));
            }
        }
        out
    }

    #[test]
    fn test_hit_rate_exact() {
        let outcomes = outcomes(&[(Classification::Hit, 80), (Classification::Miss, 20)]);
        let result = summarize("test", 100, Duration::from_secs(1), &outcomes);
        assert_eq!(result.hits, 80);
        assert_eq!(result.misses, 20);
        assert_eq!(result.hit_rate, 0.8);
    }

    #[test]
    fn test_zero_reads_hit_rate_is_zero() {
        let outcomes = outcomes(&[(Classification::Write, 10), (Classification::Error, 2)]);
        let result = summarize("test", 12, Duration::from_secs(1), &outcomes);
        assert_eq!(result.hit_rate, 0.0);
        assert!(!result.hit_rate.is_nan());
        assert_eq!(result.accounted(), 12);
    }

    #[test]
    fn test_ops_per_second_zero_duration() {
        assert_eq!(ops_per_second(100, Duration::ZERO), 0.0);
        assert_eq!(ops_per_second(100, Duration::from_secs(2)), 50.0);
    }

    #[test]
    fn test_percentile_threshold() {
        let few: Vec<Duration> = (1..=20).map(Duration::from_millis).collect();
        assert_eq!(percentile(&few, 0.95), Duration::ZERO);

        let many: Vec<Duration> = (0..100).map(Duration::from_millis).collect();
        // floor(0.95 * 100) = 95
        assert_eq!(percentile(&many, 0.95), Duration::from_millis(95));
        assert_eq!(percentile(&many, 0.50), Duration::from_millis(50));
    }

    #[test]
    fn test_latency_summary() {
        let sorted: Vec<Duration> = (1..=4).map(Duration::from_millis).collect();
        let summary = latency_summary(&sorted);
        assert_eq!(summary.average, Duration::from_micros(2500));
        assert_eq!(summary.min, Duration::from_millis(1));
        assert_eq!(summary.max, Duration::from_millis(4));
        assert_eq!(summary.p95, Duration::ZERO);

        assert_eq!(latency_summary(&[]), LatencySummary::default());
    }

    #[test]
    fn test_average_of_extreme_latencies() {
        // summing these as a Duration would overflow
        let sorted = vec![Duration::MAX, Duration::MAX];
        assert_eq!(latency_summary(&sorted).average, Duration::MAX);

        let sorted = vec![Duration::from_nanos(1), Duration::from_nanos(2)];
        assert_eq!(latency_summary(&sorted).average, Duration::from_nanos(1));
    }

    #[test]
    fn test_latencies_sorted() {
        let outcomes = vec![
            OperationOutcome::new(Duration::from_millis(3), Classification::Hit),
            OperationOutcome::new(Duration::from_millis(1), Classification::Miss),
            OperationOutcome::new(Duration::from_millis(2), Classification::Write),
        ];
        let result = summarize("test", 3, Duration::from_millis(10), &outcomes);
        assert_eq!(
            result.latencies,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(3)
            ]
        );
    }

    #[test]
    fn test_tally_concurrent_records() {
        use std::sync::Arc;
        use std::thread;

        let tally = Arc::new(OutcomeTally::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tally = Arc::clone(&tally);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        tally.record(Classification::Hit);
                        tally.record(Classification::Write);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tally.record(Classification::Error), 8001);
        let snapshot = tally.snapshot();
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.hits, 4000);
        assert_eq!(snapshot.writes, 4000);
        assert_eq!(snapshot.total(), 8001);
    }
}
