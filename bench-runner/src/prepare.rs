//! Store preparation before each run.

use std::time::Instant;

use anyhow::Context;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tierbench::store::Endpoint;
use tierbench::workload::{key_name, random_payload, Seed};

/// Writes kept in flight while populating.
const POPULATE_CONCURRENCY: usize = 64;

/// Flushes the store and writes every key `key-0 .. key-{num_keys-1}` with a
/// `value_size` byte payload, so every read in the run finds its key.
pub async fn prepare_data(
    endpoint: &Endpoint,
    num_keys: usize,
    value_size: usize,
    seed: Seed,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let client = endpoint
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", endpoint))?;

    client.flush_all().await.context("failed to flush datastore")?;

    let mut rng = StdRng::seed_from_u64(seed.resolve());
    let value = random_payload(value_size, &mut rng);
    let client = &client;
    let value = value.as_str();

    stream::iter(0..num_keys)
        .map(|i| async move { client.set(&key_name(i), value).await })
        .buffer_unordered(POPULATE_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await
        .context("failed to pre-populate datastore")?;

    tracing::info!(
        keys = num_keys,
        value_size,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "data preparation complete"
    );
    Ok(())
}
