//! Per-path mutual exclusion for index mutations.
//!
//! Every operation that opens a target store takes that target's lock first.
//! Locks for different paths are independent; the lock for a given path is
//! created on first use and kept for the life of the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry mapping a target path to its lock.
#[derive(Clone, Default)]
pub struct StoreLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl StoreLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    ///
    /// The guard releases the path when dropped.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }

        tracing::debug!(path = %path.display(), "Waiting for index lock");
        lock.lock_owned().await
    }

    /// Number of paths that have been locked at least once
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
