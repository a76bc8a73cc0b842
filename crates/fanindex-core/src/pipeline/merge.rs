//! Merge & commit into the target, and removal of the temporary tree.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use milli::update::IndexerConfig;
use tokio_util::sync::CancellationToken;

use crate::models::FieldSchema;
use crate::search::{StoreHandle, WriteSession};

use super::TMP_DIR;

/// Target document counts around a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MergeOutcome {
    pub previous_total: u64,
    pub merged_total: u64,
}

/// Fold every partial store into `target` and commit.
///
/// The documents are applied by one write transaction, so a failure before the
/// commit leaves the target's documents as they were. Field settings are
/// committed first in their own transaction and may already include the new
/// fields when the fold fails.
pub(crate) fn merge_partials(
    target: StoreHandle,
    partials: &[StoreHandle],
    schema: &FieldSchema,
    indexer_config: Arc<IndexerConfig>,
    map_size: usize,
    cancel: CancellationToken,
) -> Result<MergeOutcome> {
    let mut session = WriteSession::open(target, map_size, indexer_config, cancel)
        .context("Failed to open target store")?;
    session
        .apply_schema(schema)
        .context("Failed to update target settings")?;
    let previous_total = session.document_count()?;

    let staged = session
        .merge_from(partials, map_size)
        .context("Failed to read partial stores")?;
    tracing::debug!(
        target = %session.path().display(),
        partials = partials.len(),
        staged,
        "Folding partial stores"
    );

    session.commit().context("Failed to commit target store")?;
    let merged_total = session.document_count()?;
    session.close();

    Ok(MergeOutcome {
        previous_total,
        merged_total,
    })
}

/// Remove `<target>/tmp`. Failures are logged; returns whether the tree is gone.
pub(crate) fn cleanup(target: &Path) -> bool {
    let tmp_root = target.join(TMP_DIR);
    match std::fs::remove_dir_all(&tmp_root) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %tmp_root.display(), error = %e, "Failed to remove temporary stores");
            false
        }
    }
}
