//! Benchmark scenarios: built-in defaults and TOML scenario files.

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use tierbench::workload::{KeyDistribution, Seed, WorkloadConfig};

const DEFAULT_ZIPF_EXPONENT: f64 = 1.01;
const DEFAULT_ZIPF_OFFSET: f64 = 1.0;

/// Key popularity as written in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Uniform,
    #[default]
    Zipf,
}

/// One benchmark scenario
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub operations: usize,
    pub keys: usize,
    pub read_ratio: f64,
    pub value_size: usize,
    pub concurrency: usize,
    #[serde(default)]
    pub distribution: DistributionKind,
    #[serde(default = "default_zipf_exponent")]
    pub zipf_exponent: f64,
    #[serde(default = "default_zipf_offset")]
    pub zipf_offset: f64,
}

fn default_zipf_exponent() -> f64 {
    DEFAULT_ZIPF_EXPONENT
}

fn default_zipf_offset() -> f64 {
    DEFAULT_ZIPF_OFFSET
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(rename = "scenario", default)]
    scenarios: Vec<Scenario>,
}

impl Scenario {
    fn zipf(
        name: &str,
        operations: usize,
        keys: usize,
        read_ratio: f64,
        value_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            operations,
            keys,
            read_ratio,
            value_size,
            concurrency,
            distribution: DistributionKind::Zipf,
            zipf_exponent: DEFAULT_ZIPF_EXPONENT,
            zipf_offset: DEFAULT_ZIPF_OFFSET,
        }
    }

    pub fn key_distribution(&self) -> KeyDistribution {
        match self.distribution {
            DistributionKind::Uniform => KeyDistribution::Uniform,
            DistributionKind::Zipf => KeyDistribution::zipf(self.zipf_exponent, self.zipf_offset),
        }
    }

    pub fn workload(&self, seed: Seed) -> WorkloadConfig {
        WorkloadConfig::new(self.operations, self.keys)
            .with_read_ratio(self.read_ratio)
            .with_distribution(self.key_distribution())
            .with_seed(seed)
    }
}

/// The standard scenario set.
pub fn default_scenarios() -> Vec<Scenario> {
    let mut uniform = Scenario::zipf(
        "Uniform Workload (Worst-Case, 90% Read)",
        100_000,
        10_000,
        0.9,
        64,
        64,
    );
    uniform.distribution = DistributionKind::Uniform;

    vec![
        Scenario::zipf("Read-Heavy (90% Read, 64B Values)", 100_000, 10_000, 0.9, 64, 64),
        Scenario::zipf("Write-Heavy (50% Read, 64B Values)", 100_000, 10_000, 0.5, 64, 64),
        uniform,
        Scenario::zipf("Memory-Intensive (90% Read, 1KB Values)", 50_000, 10_000, 0.9, 1024, 64),
        Scenario::zipf("Large Value (90% Read, 2MB Values)", 2_000, 100, 0.9, 2 << 20, 64),
        Scenario::zipf("Write-Heavy & Large Value (50% Read, 2MB Values)", 2_000, 100, 0.5, 2 << 20, 64),
    ]
}

/// Loads scenarios from a TOML file of `[[scenario]]` tables.
pub fn load_scenarios(path: &Path) -> anyhow::Result<Vec<Scenario>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    parse_scenarios(&text).with_context(|| format!("invalid scenario file {}", path.display()))
}

pub fn parse_scenarios(text: &str) -> anyhow::Result<Vec<Scenario>> {
    let file: ScenarioFile = toml::from_str(text)?;
    if file.scenarios.is_empty() {
        bail!("no [[scenario]] entries");
    }
    for scenario in &file.scenarios {
        if scenario.concurrency == 0 {
            bail!("scenario '{}': concurrency must be at least 1", scenario.name);
        }
    }
    Ok(file.scenarios)
}

/// Keeps scenarios whose name contains `filter`, ignoring case.
pub fn filter_scenarios(scenarios: Vec<Scenario>, filter: Option<&str>) -> Vec<Scenario> {
    match filter {
        Some(filter) => {
            let needle = filter.to_lowercase();
            scenarios
                .into_iter()
                .filter(|s| s.name.to_lowercase().contains(&needle))
                .collect()
        }
        None => scenarios,
    }
}
