//! Process-wide entry point.
//!
//! Every call that touches a target store (reads included) takes the
//! target's lock first and runs engine work on the blocking pool.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use milli::update::IndexerConfig;
use milli::Index;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::locks::StoreLocks;
use crate::models::{engine_key, restore_doc_id, Document, FieldSchema};
use crate::pipeline::{self, BuildReport, RunOptions, TMP_DIR};
use crate::search::{self, StoreHandle, WriteSession};

/// Owns configuration, the lock registry and the shared indexer thread pool.
pub struct IndexService {
    config: Config,
    locks: StoreLocks,
    indexer_config: Arc<IndexerConfig>,
    cancel: CancellationToken,
}

impl IndexService {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;

        tracing::info!(
            store_root = %config.store_root.display(),
            workers = config.max_parallel_workers,
            policy = ?config.failure_policy,
            "Index service ready"
        );

        Ok(Self {
            config,
            locks: StoreLocks::new(),
            indexer_config: Arc::new(IndexerConfig::default()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &StoreLocks {
        &self.locks
    }

    /// Resolve an index name to its directory under the store root.
    pub fn index_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.config.store_root.join(validate_index_name(name)?))
    }

    /// Stop accepting work and cancel in-flight builds.
    pub fn shutdown(&self) {
        tracing::info!("Index service shutting down");
        self.cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Bulk-build `documents` into the index called `name`.
    pub async fn write_index(&self, documents: Vec<Document>, name: &str) -> Result<BuildReport> {
        let path = self.index_path(name)?;
        self.ensure_running()?;

        let _guard = self.locks.acquire(&path).await;
        self.ensure_running()?;

        let options = RunOptions {
            worker_limit: self.config.max_parallel_workers,
            map_size: self.config.map_size,
            failure_policy: self.config.failure_policy,
            build_timeout: self.config.build_timeout(),
            indexer_config: self.indexer_config.clone(),
            cancel: self.cancel.child_token(),
        };

        pipeline::run(name, &path, documents, &options).await
    }

    /// Replace one document, matched by its `doc_id`.
    pub async fn update_document(&self, name: &str, document: Document) -> Result<()> {
        if document.doc_id().is_none() {
            return Err(Error::InvalidDocument(
                "update requires a doc_id field".to_string(),
            ));
        }
        let schema = FieldSchema::from_documents([&document]);
        let object = document.to_object()?;

        self.with_session(name, move |session| {
            session.apply_schema(&schema)?;
            session.add_all(vec![object]);
            session.commit()
        })
        .await
    }

    /// Remove one document by `doc_id`. Missing documents are ignored.
    pub async fn delete_document(&self, name: &str, doc_id: &str) -> Result<()> {
        let key = engine_key(doc_id);
        self.with_session(name, move |session| {
            session.delete(vec![key]);
            session.commit()
        })
        .await
    }

    /// Remove every document and return how many were removed.
    pub async fn delete_all(&self, name: &str) -> Result<u64> {
        self.with_session(name, |session| {
            let ids = search::all_document_ids(session.index())?;
            let removed = ids.len() as u64;
            session.delete(ids);
            session.commit()?;
            Ok(removed)
        })
        .await
    }

    /// Number of documents in the index; zero if it does not exist.
    pub async fn document_count(&self, name: &str) -> Result<u64> {
        self.with_index(name, 0, search::get_document_count).await
    }

    pub async fn get_document(
        &self,
        name: &str,
        doc_id: &str,
    ) -> Result<Option<Map<String, Value>>> {
        let key = engine_key(doc_id);
        self.with_index(name, None, move |index| {
            let mut document = search::get_document_by_external_id(index, &key)?;
            if let Some(ref mut object) = document {
                restore_doc_id(object);
            }
            Ok(document)
        })
        .await
    }

    /// Run `op` against a write session on the index, under its lock.
    async fn with_session<T, F>(&self, name: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut WriteSession) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.index_path(name)?;
        self.ensure_running()?;
        let _guard = self.locks.acquire(&path).await;

        let handle = StoreHandle::resolve(&path)?;
        let indexer_config = self.indexer_config.clone();
        let map_size = self.config.map_size;
        let cancel = self.cancel.child_token();

        let value = tokio::task::spawn_blocking(move || {
            let mut session = WriteSession::open(handle, map_size, indexer_config, cancel)?;
            let value = op(&mut session)?;
            session.close();
            Ok::<_, anyhow::Error>(value)
        })
        .await??;

        Ok(value)
    }

    /// Run a read against the index, under its lock. Returns `missing` when
    /// the index has never been created.
    async fn with_index<T, F>(&self, name: &str, missing: T, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Index) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.index_path(name)?;
        self.ensure_running()?;
        let _guard = self.locks.acquire(&path).await;

        if !tokio::fs::try_exists(&path).await? {
            return Ok(missing);
        }

        let indexer_config = self.indexer_config.clone();
        let map_size = self.config.map_size;
        let value = tokio::task::spawn_blocking(move || {
            let index = search::open_index(&path, map_size, &indexer_config)?;
            op(&index)
        })
        .await??;

        Ok(value)
    }
}

/// Accept only plain relative names that cannot reach outside the store root
/// or into a temporary tree.
fn validate_index_name(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    if name.trim().is_empty() || path.is_absolute() {
        return Err(Error::InvalidIndexName(name.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(part) if part != TMP_DIR => {}
            _ => return Err(Error::InvalidIndexName(name.to_string())),
        }
    }
    Ok(path)
}
