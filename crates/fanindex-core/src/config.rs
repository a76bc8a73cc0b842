use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default LMDB map size for every store (10 GB).
/// This is the maximum size a single store can grow to.
pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024;

/// Default number of partitions built in parallel.
/// Tune per deployment according to CPU count and disk IO headroom.
pub const DEFAULT_MAX_PARALLEL_WORKERS: usize = 2;

/// What a bulk build does when some partitions fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFailurePolicy {
    /// Merge whatever partitions succeeded; failures are reported, not raised.
    #[default]
    BestEffort,
    /// Any failed partition aborts the run before the target is touched.
    FailFast,
}

/// Service configuration, usually read from a JSON settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory holding every index
    pub store_root: PathBuf,
    /// Upper bound on partitions built concurrently for one bulk build
    pub max_parallel_workers: usize,
    /// LMDB map size used when opening stores
    pub map_size: usize,
    /// Deadline for the partition build phase; `None` waits indefinitely
    pub build_timeout_secs: Option<u64>,
    pub failure_policy: PartitionFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("fanindex").join("indexes"),
            max_parallel_workers: DEFAULT_MAX_PARALLEL_WORKERS,
            map_size: DEFAULT_MAP_SIZE,
            build_timeout_secs: None,
            failure_policy: PartitionFailurePolicy::BestEffort,
        }
    }
}

impl Config {
    /// Default location of the settings file (`~/.config/fanindex/settings.json`)
    pub fn default_settings_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fanindex")
            .join("settings.json")
    }

    /// Load settings from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_workers == 0 {
            return Err(Error::InvalidConfig(
                "max_parallel_workers must be at least 1".to_string(),
            ));
        }
        if self.map_size == 0 {
            return Err(Error::InvalidConfig("map_size must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }

    /// Set the store root
    pub fn with_store_root(mut self, store_root: impl Into<PathBuf>) -> Self {
        self.store_root = store_root.into();
        self
    }

    /// Set the number of parallel workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_parallel_workers = workers;
        self
    }

    pub fn with_failure_policy(mut self, policy: PartitionFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Ensure the store root exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.store_root)
    }
}
