use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tierbench::config::{
    InvalidatedConfig, LocalCacheConfig, LocalCachePolicy, RunnerConfig, ServerAssistedConfig,
};
use tierbench::runner::Runner;
use tierbench::store::Endpoint;
use tierbench::strategy::{StrategyKind, StrategySettings};
use tierbench::workload::{generate, Seed};

mod prepare;
mod report;
mod scenario;

use report::ScenarioResults;

/// Two-tier caching strategy benchmark
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store to benchmark against: redis://host:port, host:port or memory
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    store: String,

    /// TOML file with [[scenario]] tables; the built-in set is used otherwise
    #[arg(long, value_name = "PATH")]
    scenarios: Option<PathBuf>,

    /// Only run scenarios whose name contains this text
    #[arg(long, value_name = "NAME")]
    scenario: Option<String>,

    /// Strategies to run (invalidated, server-assisted)
    #[arg(long, value_name = "STRATEGIES", num_args = 1.., value_delimiter = ',')]
    strategies: Option<Vec<StrategyKind>>,

    /// Fixed seed for workloads and payloads; clock-seeded when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Per-operation deadline in milliseconds (0 disables)
    #[arg(long, default_value = "10000")]
    op_timeout_ms: u64,

    /// Byte budget of the local cache of the invalidated strategy
    #[arg(long, default_value = "1073741824")]
    local_cache_bytes: u64,

    /// Byte budget of the client cache, converted to a key count per scenario
    #[arg(long, default_value = "1073741824")]
    client_cache_bytes: u64,

    /// Local cache policy: gdsf or moka
    #[arg(long, default_value = "gdsf")]
    local_policy: LocalCachePolicy,

    /// Number of local cache segments
    #[arg(long)]
    segments: Option<usize>,

    /// Delay before the invalidation listener evicts a key, in milliseconds
    #[arg(long, default_value = "0")]
    invalidation_delay_ms: u64,

    /// Simulated round trip of the in-process store, in microseconds
    #[arg(long, default_value = "0")]
    memory_latency_us: u64,

    /// Log progress every N completed operations (0 disables)
    #[arg(long, default_value = "0")]
    progress_interval: u64,

    /// Export results to CSV file
    #[arg(long, value_name = "PATH")]
    output_csv: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let endpoint = Endpoint::parse(&args.store)
        .with_context(|| format!("invalid --store '{}'", args.store))?;
    if let Endpoint::Memory(store) = &endpoint {
        store.set_latency(Duration::from_micros(args.memory_latency_us));
    }

    let scenarios = match &args.scenarios {
        Some(path) => scenario::load_scenarios(path)?,
        None => scenario::default_scenarios(),
    };
    let scenarios = scenario::filter_scenarios(scenarios, args.scenario.as_deref());
    if scenarios.is_empty() {
        anyhow::bail!("no scenario matches the given filter");
    }

    let strategies = match &args.strategies {
        Some(kinds) if !kinds.is_empty() => kinds.clone(),
        _ => StrategyKind::all().to_vec(),
    };
    let seed = args.seed.map_or(Seed::Clock, Seed::Fixed);
    let op_timeout = (args.op_timeout_ms > 0).then(|| Duration::from_millis(args.op_timeout_ms));

    println!("Tiered Cache Benchmark");
    println!("======================");
    println!("Store: {}", endpoint);
    println!(
        "Strategies: {:?}",
        strategies.iter().map(|s| s.as_str()).collect::<Vec<_>>()
    );
    println!("Scenarios: {}", scenarios.len());
    println!(
        "Local cache: {} bytes ({}), client cache: {} bytes",
        args.local_cache_bytes, args.local_policy, args.client_cache_bytes
    );
    if let Some(seed) = args.seed {
        println!("Seed: {seed}");
    }

    let mut local_cache = LocalCacheConfig::new(args.local_cache_bytes).with_policy(args.local_policy);
    if let Some(segments) = args.segments {
        local_cache = local_cache.with_segments(segments);
    }

    let mut all = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        println!("\nScenario: {}", scenario.name);
        println!(
            "  {} operations on {} keys, concurrency {}, read ratio {:.2}, value size {}B, {}",
            scenario.operations,
            scenario.keys,
            scenario.concurrency,
            scenario.read_ratio,
            scenario.value_size,
            scenario.key_distribution()
        );

        let operations = generate(&scenario.workload(seed))
            .with_context(|| format!("failed to generate workload for '{}'", scenario.name))?;

        let settings = StrategySettings {
            invalidated: InvalidatedConfig::new(local_cache)
                .with_invalidation_delay(Duration::from_millis(args.invalidation_delay_ms)),
            server_assisted: ServerAssistedConfig::from_budget(
                args.client_cache_bytes,
                scenario.value_size,
            ),
        };
        let runner = Runner::new(
            RunnerConfig::new(scenario.concurrency, scenario.value_size)
                .with_op_timeout(op_timeout)
                .with_seed(seed)
                .with_progress_interval(args.progress_interval),
        );

        let mut results = Vec::with_capacity(strategies.len());
        for kind in &strategies {
            prepare::prepare_data(&endpoint, scenario.keys, scenario.value_size, seed)
                .await
                .with_context(|| format!("failed to prepare data for {}", kind))?;

            let strategy = kind.build(&endpoint, &settings);
            match runner.run(strategy, &operations).await {
                Ok(result) => {
                    report::print_run(&result);
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(scenario = %scenario.name, strategy = %kind, error = %e, "benchmark run failed");
                }
            }
        }

        all.push(ScenarioResults {
            scenario: scenario.name.clone(),
            results,
        });
    }

    report::print_comparison(&all);

    if let Some(path) = &args.output_csv {
        report::export_csv(&all, path)
            .with_context(|| format!("failed to export CSV to {}", path.display()))?;
        println!("\nResults exported to: {}", path.display());
    }

    Ok(())
}
