//! Bulk build results.

use serde::{Deserialize, Serialize};

/// Where a bulk build ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    /// Target committed, temporary tree left behind
    Merged,
    CleanedUp,
    /// At least one partition failed; whatever succeeded was merged
    PartiallyFailed,
    /// Nothing to build
    Empty,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Merged => write!(f, "merged"),
            RunState::CleanedUp => write!(f, "cleaned_up"),
            RunState::PartiallyFailed => write!(f, "partially_failed"),
            RunState::Empty => write!(f, "empty"),
        }
    }
}

/// A partition that contributed nothing to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub partition: usize,
    pub documents: usize,
    pub error: String,
}

/// Result of one partial build.
#[derive(Debug)]
pub(crate) enum PartitionOutcome {
    /// Partial store built; `committed` is the engine's own count.
    Built {
        partition: usize,
        committed: u64,
        store: crate::search::StoreHandle,
    },
    Failed(PartitionFailure),
}

/// Summary of one bulk build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub index: String,
    /// RFC 3339 start time
    pub started_at: String,
    pub partitions: usize,
    /// Sum of the documents committed by successful partitions
    pub committed: u64,
    /// Document count of the target before the merge
    pub previous_total: Option<u64>,
    /// Document count of the target after the merge
    pub merged_total: Option<u64>,
    pub failures: Vec<PartitionFailure>,
    pub state: RunState,
    pub elapsed_ms: u64,
    pub merge_ms: Option<u64>,
}

impl BuildReport {
    pub(crate) fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
            partitions: 0,
            committed: 0,
            previous_total: None,
            merged_total: None,
            failures: Vec::new(),
            state: RunState::Running,
            elapsed_ms: 0,
            merge_ms: None,
        }
    }

    /// Whether the target grew by something other than the committed count.
    ///
    /// Replacing documents that already existed in the target also shows up here.
    pub fn has_count_mismatch(&self) -> bool {
        match (self.previous_total, self.merged_total) {
            (Some(before), Some(after)) => after != before + self.committed,
            _ => false,
        }
    }
}
