//! Result tables and CSV export.

use std::path::Path;
use std::time::Duration;

use tierbench::models::{BenchmarkResult, CsvResultRow};

/// Results of every strategy for one scenario, in run order.
#[derive(Debug)]
pub struct ScenarioResults {
    pub scenario: String,
    pub results: Vec<BenchmarkResult>,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Prints one run as soon as it finishes.
pub fn print_run(result: &BenchmarkResult) {
    println!(
        "  {}: {} ops in {:.2?} ({:.0} ops/s), hits {}, misses {}, writes {}, errors {}",
        result.strategy_name,
        result.total_operations,
        result.duration,
        result.ops_per_second,
        result.hits,
        result.misses,
        result.writes,
        result.errors
    );
}

/// Prints the final comparison table, one block per scenario.
pub fn print_comparison(all: &[ScenarioResults]) {
    println!("\nFinal Benchmark Comparison");
    println!("==========================");

    for scenario in all {
        println!("\nScenario: {}", scenario.scenario);
        println!(
            "{:<34} {:>12} {:>10} {:>10} {:>12} {:>12} {:>12} {:>8}",
            "Strategy", "Ops/sec", "HitRate", "TotalOps", "Avg (ms)", "P95 (ms)", "P99 (ms)", "Errors"
        );
        println!("{}", "-".repeat(118));

        for r in &scenario.results {
            println!(
                "{:<34} {:>12.2} {:>9.2}% {:>10} {:>12.4} {:>12.4} {:>12.4} {:>8}",
                r.strategy_name,
                r.ops_per_second,
                r.hit_rate * 100.0,
                r.total_operations,
                ms(r.latency.average),
                ms(r.latency.p95),
                ms(r.latency.p99),
                r.errors
            );
        }
    }
}

/// Writes one CSV row per (scenario, strategy) run.
pub fn export_csv(all: &[ScenarioResults], path: &Path) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for scenario in all {
        for result in &scenario.results {
            writer.serialize(CsvResultRow::new(&scenario.scenario, result))?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierbench::models::{Classification, OperationOutcome};
    use tierbench::stats::summarize;

    #[test]
    fn test_export_csv() {
        let outcomes = vec![
            OperationOutcome::new(Duration::from_micros(10), Classification::Hit),
            OperationOutcome::new(Duration::from_micros(30), Classification::Miss),
        ];
        let all = vec![ScenarioResults {
            scenario: "tiny".to_string(),
            results: vec![summarize("strategy-a", 2, Duration::from_millis(1), &outcomes)],
        }];

        let path = std::env::temp_dir().join(format!("tierbench-report-{}.csv", std::process::id()));
        export_csv(&all, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("scenario,strategy,total_ops,hits,misses"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("tiny,strategy-a,2,1,1,0,0,0.5"));
        assert!(lines.next().is_none());
    }
}
