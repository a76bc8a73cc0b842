//! Partial-build worker.
//!
//! Runs on the blocking pool. One worker owns one partial store for the
//! whole build and hands the store back only if the build succeeded.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use milli::update::IndexerConfig;
use tokio_util::sync::CancellationToken;

use crate::models::{Document, FieldSchema};
use crate::search::{StoreHandle, WriteSession};

use super::types::{PartitionFailure, PartitionOutcome};

/// Everything one worker needs to build its partition.
pub(crate) struct PartitionJob {
    pub partition: usize,
    pub documents: Vec<Document>,
    pub store: StoreHandle,
    pub schema: Arc<FieldSchema>,
    pub indexer_config: Arc<IndexerConfig>,
    pub map_size: usize,
    pub cancel: CancellationToken,
}

/// Build one partial store. Errors are recorded, never propagated.
pub(crate) fn build_partition(job: PartitionJob) -> PartitionOutcome {
    let partition = job.partition;
    let documents = job.documents.len();
    let start = Instant::now();

    match build(job) {
        Ok((committed, store)) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if committed != documents as u64 {
                tracing::warn!(
                    partition,
                    documents,
                    committed,
                    "Partial store holds fewer documents than submitted"
                );
            }
            tracing::info!(partition, documents, committed, elapsed_ms, "Built partial store");
            PartitionOutcome::Built {
                partition,
                committed,
                store,
            }
        }
        Err(e) => {
            tracing::error!(partition, documents, error = %e, "Partition build failed");
            PartitionOutcome::Failed(PartitionFailure {
                partition,
                documents,
                error: format!("{:#}", e),
            })
        }
    }
}

fn build(job: PartitionJob) -> Result<(u64, StoreHandle)> {
    if job.cancel.is_cancelled() {
        anyhow::bail!("cancelled before start");
    }

    let objects = job
        .documents
        .iter()
        .map(Document::to_object)
        .collect::<crate::Result<Vec<_>>>()?;

    let mut session = WriteSession::open(job.store, job.map_size, job.indexer_config, job.cancel)?;
    session.apply_schema(&job.schema)?;
    session.add_all(objects);
    session.commit()?;
    let committed = session.document_count()?;

    Ok((committed, session.close()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::DEFAULT_MAP_SIZE;

    fn job(dir: &std::path::Path, documents: Vec<Document>, cancel: CancellationToken) -> PartitionJob {
        let schema = Arc::new(FieldSchema::from_documents(&documents));
        PartitionJob {
            partition: 0,
            documents,
            store: StoreHandle::resolve(dir.join("0")).unwrap(),
            schema,
            indexer_config: Arc::new(IndexerConfig::default()),
            map_size: DEFAULT_MAP_SIZE,
            cancel,
        }
    }

    fn books(count: usize) -> Vec<Document> {
        (0..count)
            .map(|i| {
                Document::new()
                    .keyword("doc_id", format!("book-{}", i))
                    .stored_text("title", format!("Book {}", i))
            })
            .collect()
    }

    #[test]
    fn test_build_reports_engine_count() {
        let temp_dir = tempfile::tempdir().unwrap();
        let outcome = build_partition(job(temp_dir.path(), books(4), CancellationToken::new()));

        match outcome {
            PartitionOutcome::Built {
                committed, store, ..
            } => {
                assert_eq!(committed, 4);
                assert_eq!(store.path(), temp_dir.path().join("0").as_path());
            }
            PartitionOutcome::Failed(f) => panic!("unexpected failure: {}", f.error),
        }
    }

    #[test]
    fn test_duplicate_ids_are_counted_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut documents = books(3);
        documents.push(Document::new().keyword("doc_id", "book-0").stored_text("title", "Again"));

        match build_partition(job(temp_dir.path(), documents, CancellationToken::new())) {
            PartitionOutcome::Built { committed, .. } => assert_eq!(committed, 3),
            PartitionOutcome::Failed(f) => panic!("unexpected failure: {}", f.error),
        }
    }

    #[test]
    fn test_invalid_document_fails_partition() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut documents = books(2);
        documents.push(Document::new().keyword("", "orphan"));

        match build_partition(job(temp_dir.path(), documents, CancellationToken::new())) {
            PartitionOutcome::Failed(failure) => {
                assert_eq!(failure.partition, 0);
                assert_eq!(failure.documents, 3);
                assert!(failure.error.contains("field name"));
            }
            PartitionOutcome::Built { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn test_cancelled_worker_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = build_partition(job(temp_dir.path(), books(2), cancel));
        assert!(matches!(outcome, PartitionOutcome::Failed(_)));
    }
}
