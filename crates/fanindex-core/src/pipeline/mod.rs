//! Parallel bulk build.
//!
//! # Flow
//!
//! ```text
//! batch ──► partition() ──► N partitions
//!                               │
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!      worker (tmp/0)     worker (tmp/1)   …  worker (tmp/N-1)
//!            │                  │                  │
//!            └──────────► join barrier ◄───────────┘
//!                               │
//!                               ▼
//!                  merge + commit into target
//!                               │
//!                               ▼
//!                     remove <target>/tmp
//! ```
//!
//! [`run`] assumes the caller holds the target's lock from
//! [`crate::locks::StoreLocks`] for the whole call.

mod merge;
mod partition;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use partition::partition;
pub use types::{BuildReport, PartitionFailure, RunState};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use milli::update::IndexerConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PartitionFailurePolicy;
use crate::error::{Error, Result};
use crate::models::{Document, FieldSchema};
use crate::search::StoreHandle;

use types::PartitionOutcome;
use worker::PartitionJob;

/// Directory under a target holding the partial stores of a run.
pub const TMP_DIR: &str = "tmp";

/// Knobs for one bulk build.
#[derive(Clone)]
pub struct RunOptions {
    pub worker_limit: usize,
    pub map_size: usize,
    pub failure_policy: PartitionFailurePolicy,
    /// Deadline for the partition phase
    pub build_timeout: Option<Duration>,
    pub indexer_config: Arc<IndexerConfig>,
    /// Cancels workers and the merge
    pub cancel: CancellationToken,
}

/// Build `batch` into the index at `target`.
///
/// Partition failures are handled per [`PartitionFailurePolicy`]. A merge or
/// commit failure is returned as [`Error::Merge`] and leaves `<target>/tmp`
/// in place.
pub async fn run(
    name: &str,
    target: &Path,
    batch: Vec<Document>,
    options: &RunOptions,
) -> Result<BuildReport> {
    let start = Instant::now();
    let mut report = BuildReport::new(name);

    if batch.is_empty() {
        report.state = RunState::Empty;
        tracing::info!(index = name, "Empty batch, nothing to build");
        return Ok(report);
    }

    let tmp_root = target.join(TMP_DIR);
    remove_stale_tmp(&tmp_root).await?;

    let total_documents = batch.len();
    let schema = Arc::new(FieldSchema::from_documents(&batch));
    let partitions = partition(batch, options.worker_limit);
    report.partitions = partitions.len();

    tracing::info!(
        index = name,
        documents = total_documents,
        partitions = report.partitions,
        "Starting bulk build"
    );

    let build_cancel = options.cancel.child_token();
    let watchdog = options
        .build_timeout
        .map(|timeout| spawn_watchdog(timeout, build_cancel.clone()));

    let mut failures = Vec::new();
    let mut tasks = Vec::with_capacity(partitions.len());
    for (i, documents) in partitions.into_iter().enumerate() {
        let count = documents.len();
        let store = match StoreHandle::resolve(tmp_root.join(i.to_string())) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(partition = i, error = %e, "Failed to create partial store");
                failures.push(PartitionFailure {
                    partition: i,
                    documents: count,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let job = PartitionJob {
            partition: i,
            documents,
            store,
            schema: schema.clone(),
            indexer_config: options.indexer_config.clone(),
            map_size: options.map_size,
            cancel: build_cancel.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || worker::build_partition(job));
        tasks.push(async move { (i, count, handle.await) });
    }

    // Barrier: every dispatched worker finishes before anything is merged.
    let results = futures::future::join_all(tasks).await;
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let mut built = Vec::new();
    for (partition, documents, result) in results {
        match result {
            Ok(PartitionOutcome::Built {
                partition,
                committed,
                store,
            }) => {
                tracing::debug!(partition, committed, "Partial store ready for merge");
                report.committed += committed;
                built.push(store);
            }
            Ok(PartitionOutcome::Failed(failure)) => failures.push(failure),
            Err(e) => {
                tracing::error!(partition, error = %e, "Partition worker panicked");
                failures.push(PartitionFailure {
                    partition,
                    documents,
                    error: format!("worker task failed: {}", e),
                });
            }
        }
    }
    failures.sort_by_key(|f| f.partition);

    if !failures.is_empty() {
        tracing::warn!(
            index = name,
            failed = failures.len(),
            partitions = report.partitions,
            "Some partitions failed"
        );

        if options.failure_policy == PartitionFailurePolicy::FailFast {
            drop(built);
            remove_tmp(target).await;
            return Err(Error::PartitionsFailed {
                total: report.partitions,
                failures,
            });
        }

        if built.is_empty() {
            report.failures = failures;
            report.state = RunState::PartiallyFailed;
            report.elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::error!(index = name, "Every partition failed, skipping merge");
            return Ok(report);
        }
    }

    let merge_start = Instant::now();
    let target_store = StoreHandle::resolve(target)?;
    let merged = {
        let schema = schema.clone();
        let indexer_config = options.indexer_config.clone();
        let map_size = options.map_size;
        let cancel = options.cancel.clone();
        tokio::task::spawn_blocking(move || {
            merge::merge_partials(target_store, &built, &schema, indexer_config, map_size, cancel)
        })
        .await
    };
    let outcome = match merged {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(source)) => {
            tracing::error!(index = name, error = %source, "Merge failed");
            return Err(Error::Merge {
                path: target.to_path_buf(),
                source,
            });
        }
        Err(e) => {
            tracing::error!(index = name, error = %e, "Merge task panicked");
            return Err(Error::Merge {
                path: target.to_path_buf(),
                source: e.into(),
            });
        }
    };

    let merge_ms = merge_start.elapsed().as_millis() as u64;
    report.merge_ms = Some(merge_ms);
    report.previous_total = Some(outcome.previous_total);
    report.merged_total = Some(outcome.merged_total);
    tracing::info!(
        index = name,
        committed = report.committed,
        previous_total = outcome.previous_total,
        merged_total = outcome.merged_total,
        merge_ms,
        "Merged partial stores"
    );
    if report.has_count_mismatch() {
        tracing::warn!(
            index = name,
            committed = report.committed,
            previous_total = outcome.previous_total,
            merged_total = outcome.merged_total,
            "Merged count differs from committed count"
        );
    }

    let cleaned = remove_tmp(target).await;

    report.state = finished_state(!failures.is_empty(), cleaned);
    report.failures = failures;
    report.elapsed_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        index = name,
        state = %report.state,
        elapsed_ms = report.elapsed_ms,
        "Bulk build finished"
    );

    Ok(report)
}

/// State of a run whose merge committed. A failed cleanup never fails the run.
fn finished_state(partition_failures: bool, cleaned: bool) -> RunState {
    if partition_failures {
        RunState::PartiallyFailed
    } else if cleaned {
        RunState::CleanedUp
    } else {
        RunState::Merged
    }
}

/// Cancel `cancel` once `timeout` elapses, unless it is cancelled first.
fn spawn_watchdog(timeout: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Build deadline reached, cancelling partitions"
                );
                cancel.cancel();
            }
        }
    })
}

/// Remove a temporary tree left by an earlier run that never cleaned up.
async fn remove_stale_tmp(tmp_root: &Path) -> Result<()> {
    if tokio::fs::try_exists(tmp_root).await? {
        tracing::warn!(path = %tmp_root.display(), "Removing stale temporary stores");
        tokio::fs::remove_dir_all(tmp_root).await?;
    }
    Ok(())
}

async fn remove_tmp(target: &Path) -> bool {
    let target = target.to_path_buf();
    match tokio::task::spawn_blocking(move || merge::cleanup(&target)).await {
        Ok(cleaned) => cleaned,
        Err(e) => {
            tracing::warn!(error = %e, "Cleanup task failed");
            false
        }
    }
}
