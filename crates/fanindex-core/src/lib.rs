//! Fanindex Core - parallel bulk building of milli indexes
//!
//! A batch of documents is split into partitions, each partition is built
//! into its own temporary store on the blocking pool, and the partial stores
//! are folded into the target index in one commit:
//! - Batch partitioning ([`pipeline::partition`])
//! - Partial builds and the merge/cleanup stages ([`pipeline`])
//! - milli store access ([`search`])
//! - Per-index mutual exclusion ([`locks`])
//! - The service tying it together ([`IndexService`])

pub mod config;
pub mod error;
pub mod locks;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod service;

pub use config::{Config, PartitionFailurePolicy};
pub use error::{Error, Result};
pub use locks::StoreLocks;
pub use models::{engine_key, Document, FieldSchema, IndexField, PRIMARY_KEY, SOURCE_ID_FIELD};
pub use pipeline::{BuildReport, PartitionFailure, RunState};
pub use service::IndexService;
