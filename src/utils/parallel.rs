//! Work partitioning.
//!
//! Tracks are dealt round-robin across a fixed number of worker shards,
//! keyed by their order in the input BED; given the same worker count the
//! sharding is identical on every run. Workers process their shards
//! independently and the reducer merges per-shard maps by key.

use std::collections::BTreeMap;
use std::fmt::Debug;

use log::error;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("failed to build thread pool: {0}")]
    ThreadPoolBuildError(String),
}

/// Configuration for parallel processing.
#[derive(Clone, Debug)]
pub struct ParallelConfig {
    /// Number of threads to use.
    pub threads: usize,

    /// Whether to keep going when one item fails; failures are logged and
    /// their items dropped from the result.
    pub continue_on_error: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            threads: num_cpus::get(),
            continue_on_error: false,
        }
    }
}

/// Processes items on a pool of the configured width, preserving input
/// order in the result.
///
/// With `continue_on_error` unset the first error aborts the whole batch;
/// set, failed items are logged and skipped.
pub fn parallel_process<T, U, F, E>(
    items: Vec<T>,
    processor: F,
    config: &ParallelConfig,
) -> Result<Vec<U>, E>
where
    T: Send + Sync,
    U: Send,
    F: Fn(&T) -> Result<U, E> + Send + Sync,
    E: From<ParallelError> + Send + Debug,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| ParallelError::ThreadPoolBuildError(e.to_string()))?;
    let results: Vec<Result<U, E>> =
        pool.install(|| items.par_iter().map(|item| processor(item)).collect());

    let mut successes = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(e) => {
                if config.continue_on_error {
                    error!("worker item failed (skipped): {:?}", e);
                } else {
                    error!("worker item failed (aborting): {:?}", e);
                    return Err(e);
                }
            }
        }
    }
    Ok(successes)
}

/// Deals named items round-robin over `workers` shards, preserving input
/// order within each shard. Deterministic for a given worker count.
pub fn round_robin<T>(items: Vec<(String, T)>, workers: usize) -> Vec<Vec<(String, T)>> {
    let workers = workers.max(1);
    let mut shards: Vec<Vec<(String, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (index, item) in items.into_iter().enumerate() {
        shards[index % workers].push(item);
    }
    shards
}

/// Merges per-shard maps into one; `BTreeMap` keeps the merged keys in
/// lexicographic order. Shard keys are disjoint by construction; a repeat
/// from a later shard wins, as in a plain map update.
pub fn merge_shards<V>(shards: Vec<BTreeMap<String, V>>) -> BTreeMap<String, V> {
    let mut merged = BTreeMap::new();
    for shard in shards {
        merged.extend(shard);
    }
    merged
}
