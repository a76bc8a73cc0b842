//! Error types for the bulk index builder.

use std::path::PathBuf;

use crate::pipeline::PartitionFailure;

/// Errors returned by the public fanindex API.
///
/// Engine helpers in [`crate::search`] use `anyhow`; their errors surface here
/// through [`Error::Engine`] or, for the merge stage, [`Error::Merge`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid index name {0:?}")]
    InvalidIndexName(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised only under [`crate::config::PartitionFailurePolicy::FailFast`].
    #[error("{} of {total} partitions failed to build", failures.len())]
    PartitionsFailed {
        total: usize,
        failures: Vec<PartitionFailure>,
    },

    /// Folding the partial stores into the target (or committing it) failed.
    /// The target may be in an indeterminate state and the temporary tree is kept.
    #[error("merge into {} failed: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("index service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for fanindex operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the target index may have been left half-written.
    pub fn leaves_target_indeterminate(&self) -> bool {
        matches!(self, Error::Merge { .. })
    }
}
