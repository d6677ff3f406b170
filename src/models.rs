// Data models for benchmark runs

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// How a single operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Classification {
    /// Read served from the local tier
    Hit,
    /// Read that went to the remote store
    Miss,
    /// Successful write
    Write,
    /// Any failed or timed-out call
    Error,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Hit => "hit",
            Classification::Miss => "miss",
            Classification::Write => "write",
            Classification::Error => "error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-operation record produced by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOutcome {
    pub latency: Duration,
    pub classification: Classification,
}

impl OperationOutcome {
    pub fn new(latency: Duration, classification: Classification) -> Self {
        Self {
            latency,
            classification,
        }
    }
}

/// Latency distribution of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Percentiles are zero unless enough samples were recorded
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Aggregate result of one benchmark run
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub strategy_name: String,
    pub total_operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    /// Wall-clock duration from the first worker's start to the last worker's end
    pub duration: Duration,
    /// hits / (hits + misses), 0 when no read succeeded
    pub hit_rate: f64,
    pub ops_per_second: f64,
    /// Every recorded latency, sorted ascending
    pub latencies: Vec<Duration>,
    pub latency: LatencySummary,
}

impl BenchmarkResult {
    /// Number of outcomes that were classified
    pub fn accounted(&self) -> u64 {
        self.hits + self.misses + self.writes + self.errors
    }
}

/// CSV export row for a benchmark result
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub scenario: String,
    pub strategy: String,
    pub total_ops: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub duration_ms: f64,
    pub ops_per_sec: f64,
    pub avg_latency_us: f64,
    pub p50_latency_us: f64,
    pub p95_latency_us: f64,
    pub p99_latency_us: f64,
    pub max_latency_us: f64,
}

impl CsvResultRow {
    pub fn new(scenario: &str, result: &BenchmarkResult) -> Self {
        let us = |d: Duration| d.as_secs_f64() * 1_000_000.0;
        Self {
            scenario: scenario.to_string(),
            strategy: result.strategy_name.clone(),
            total_ops: result.total_operations,
            hits: result.hits,
            misses: result.misses,
            writes: result.writes,
            errors: result.errors,
            hit_rate: result.hit_rate,
            duration_ms: result.duration.as_secs_f64() * 1_000.0,
            ops_per_sec: result.ops_per_second,
            avg_latency_us: us(result.latency.average),
            p50_latency_us: us(result.latency.p50),
            p95_latency_us: us(result.latency.p95),
            p99_latency_us: us(result.latency.p99),
            max_latency_us: us(result.latency.max),
        }
    }
}
