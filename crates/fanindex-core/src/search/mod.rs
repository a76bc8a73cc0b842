//! milli-backed segment stores.
//!
//! A store is one LMDB environment on disk. [`StoreHandle`] names and creates
//! the location; [`WriteSession`] takes the handle by value so that at most
//! one writer can hold a given store, and gives it back from
//! [`WriteSession::close`].
//!
//! Writes are staged and applied by [`WriteSession::commit`] as a single
//! document operation inside one write transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bumpalo::Bump;
use milli::documents::mmap_from_objects;
use milli::heed::{EnvOpenOptions, RoTxn};
use milli::progress::Progress;
use milli::update::new::indexer::{self, DocumentOperation};
use milli::update::IndexerConfig;
use milli::vector::RuntimeEmbedders;
use milli::{FilterableAttributesRule, Index};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::models::{FieldSchema, PRIMARY_KEY};

/// Documents read per batch when folding a source store into a target.
const MERGE_READ_CHUNK: usize = 10_000;

/// Filesystem location of one store.
///
/// Deliberately not `Clone`: a handle moves into a [`WriteSession`] and comes
/// back out when the session closes.
#[derive(Debug, PartialEq, Eq)]
pub struct StoreHandle {
    path: PathBuf,
}

impl StoreHandle {
    /// Resolve a store location, creating the directory if needed.
    pub fn resolve(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Open or create a milli index at `path`
///
/// New indexes get [`PRIMARY_KEY`] as their primary key.
pub fn open_index(path: &Path, map_size: usize, indexer_config: &IndexerConfig) -> Result<Index> {
    std::fs::create_dir_all(path)?;

    let mut env_options = EnvOpenOptions::new();
    env_options.map_size(map_size);
    let env_options = env_options.read_txn_without_tls();

    let index = Index::new(env_options, path, true)
        .with_context(|| format!("Failed to open milli index at {:?}", path))?;

    let needs_primary_key = {
        let rtxn = index.read_txn()?;
        index.primary_key(&rtxn)?.is_none()
    };

    if needs_primary_key {
        let mut wtxn = index.write_txn()?;
        let mut settings = milli::update::Settings::new(&mut wtxn, &index, indexer_config);
        settings.set_primary_key(PRIMARY_KEY.to_string());
        settings.execute(&|| false, &Progress::default(), Default::default())?;
        wtxn.commit()?;
        tracing::debug!(path = %path.display(), "Configured primary key");
    }

    Ok(index)
}

/// Read the field behaviour currently configured on an index.
fn current_schema(index: &Index, rtxn: &RoTxn<'_>) -> Result<FieldSchema> {
    let searchable = index
        .user_defined_searchable_fields(rtxn)?
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect();
    let filterable = index
        .filterable_attributes_rules(rtxn)?
        .into_iter()
        .filter_map(|rule| match rule {
            FilterableAttributesRule::Field(field) => Some(field),
            _ => None,
        })
        .collect();
    let displayed = index
        .displayed_fields(rtxn)?
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect();

    Ok(FieldSchema {
        searchable,
        filterable,
        displayed,
    })
}

/// Union `schema` into the index settings.
///
/// Returns `false` without writing when nothing would change.
pub fn apply_schema(
    index: &Index,
    indexer_config: &IndexerConfig,
    schema: &FieldSchema,
) -> Result<bool> {
    let current = {
        let rtxn = index.read_txn()?;
        current_schema(index, &rtxn)?
    };
    let wanted = current.union(schema);
    if wanted == current {
        return Ok(false);
    }

    let mut wtxn = index.write_txn()?;
    let mut settings = milli::update::Settings::new(&mut wtxn, index, indexer_config);
    settings.set_searchable_fields(wanted.searchable.iter().cloned().collect());
    settings.set_filterable_fields(
        wanted
            .filterable
            .iter()
            .cloned()
            .map(FilterableAttributesRule::Field)
            .collect(),
    );
    settings.set_displayed_fields(wanted.displayed.iter().cloned().collect());
    settings.execute(&|| false, &Progress::default(), Default::default())?;
    wtxn.commit()?;

    tracing::debug!(
        searchable = wanted.searchable.len(),
        filterable = wanted.filterable.len(),
        displayed = wanted.displayed.len(),
        "Updated field settings"
    );

    Ok(true)
}

/// A pending write, applied in order on commit.
enum Staged {
    Replace(Vec<Map<String, Value>>),
    Delete(Vec<String>),
}

/// Index of a payload inside the commit buffers.
enum Step {
    Replace(usize),
    Delete(usize),
}

/// Exclusive write access to one store.
pub struct WriteSession {
    handle: StoreHandle,
    index: Index,
    indexer_config: Arc<IndexerConfig>,
    cancel: CancellationToken,
    staged: Vec<Staged>,
}

impl WriteSession {
    /// Open (or create) the store behind `handle` for writing.
    ///
    /// `cancel` aborts an in-progress commit.
    pub fn open(
        handle: StoreHandle,
        map_size: usize,
        indexer_config: Arc<IndexerConfig>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let index = open_index(handle.path(), map_size, &indexer_config)?;
        Ok(Self {
            handle,
            index,
            indexer_config,
            cancel,
            staged: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn apply_schema(&self, schema: &FieldSchema) -> Result<bool> {
        apply_schema(&self.index, &self.indexer_config, schema)
    }

    /// Stage documents as one bulk replace.
    pub fn add_all(&mut self, documents: Vec<Map<String, Value>>) {
        if !documents.is_empty() {
            self.staged.push(Staged::Replace(documents));
        }
    }

    /// Stage removal of documents by primary key.
    pub fn delete(&mut self, doc_ids: Vec<String>) {
        if !doc_ids.is_empty() {
            self.staged.push(Staged::Delete(doc_ids));
        }
    }

    /// Stage every document of every source store.
    ///
    /// Sources must not be open elsewhere. Returns the number of documents staged.
    /// Everything staged is held in memory as JSON until [`commit`](Self::commit),
    /// so a fold needs memory in proportion to the combined size of the sources.
    pub fn merge_from(&mut self, sources: &[StoreHandle], map_size: usize) -> Result<usize> {
        let mut staged = 0;
        for source in sources {
            let index = open_index(source.path(), map_size, &self.indexer_config)?;
            for chunk in read_all_documents(&index)? {
                staged += chunk.len();
                self.add_all(chunk);
            }
            tracing::debug!(source = %source.path().display(), "Read source store");
        }
        Ok(staged)
    }

    /// Apply everything staged in one write transaction and commit it.
    pub fn commit(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut mmaps = Vec::new();
        let mut deletions: Vec<Vec<String>> = Vec::new();
        let mut steps = Vec::new();
        for staged in std::mem::take(&mut self.staged) {
            match staged {
                Staged::Replace(objects) => {
                    steps.push(Step::Replace(mmaps.len()));
                    mmaps.push(mmap_from_objects(objects));
                }
                Staged::Delete(ids) => {
                    steps.push(Step::Delete(deletions.len()));
                    deletions.push(ids);
                }
            }
        }
        let deletion_refs: Vec<Vec<&str>> = deletions
            .iter()
            .map(|ids| ids.iter().map(String::as_str).collect())
            .collect();

        let mut operation = DocumentOperation::new();
        for step in &steps {
            match *step {
                Step::Replace(i) => operation.replace_documents(&mmaps[i])?,
                Step::Delete(i) => operation.delete_documents(&deletion_refs[i]),
            }
        }

        let index = &self.index;
        let indexer_config = &self.indexer_config;
        let cancel = self.cancel.clone();
        let must_stop = move || cancel.is_cancelled();

        let rtxn = index.read_txn()?;
        let db_fields_ids_map = index.fields_ids_map(&rtxn)?;
        let mut new_fields_ids_map = db_fields_ids_map.clone();

        let indexer_alloc = Bump::new();
        let (document_changes, operation_stats, primary_key) = operation.into_changes(
            &indexer_alloc,
            index,
            &rtxn,
            None,
            &mut new_fields_ids_map,
            &must_stop,
            Progress::default(),
            None,
        )?;

        if let Some(error) = operation_stats.into_iter().find_map(|stat| stat.error) {
            anyhow::bail!("Document operation error: {}", error);
        }

        let mut wtxn = index.write_txn()?;

        indexer_config
            .thread_pool
            .install(|| {
                indexer::index(
                    &mut wtxn,
                    index,
                    &indexer_config.thread_pool,
                    indexer_config.grenad_parameters(),
                    &db_fields_ids_map,
                    new_fields_ids_map,
                    primary_key,
                    &document_changes,
                    RuntimeEmbedders::default(),
                    &must_stop,
                    &Progress::default(),
                    &Default::default(),
                )
            })
            .map_err(|e| anyhow::anyhow!("Thread pool error: {}", e))??;

        wtxn.commit()?;

        Ok(())
    }

    /// Number of documents visible in the store
    pub fn document_count(&self) -> Result<u64> {
        get_document_count(&self.index)
    }

    /// Close the session and release the store. Uncommitted writes are dropped.
    pub fn close(self) -> StoreHandle {
        let WriteSession {
            handle,
            index,
            staged,
            ..
        } = self;
        if !staged.is_empty() {
            tracing::warn!(
                path = %handle.path().display(),
                pending = staged.len(),
                "Closing store with uncommitted writes"
            );
        }
        drop(index);
        handle
    }
}

/// Read every document of an index as JSON objects, in batches.
fn read_all_documents(index: &Index) -> Result<Vec<Vec<Map<String, Value>>>> {
    let rtxn = index.read_txn()?;
    let fields_ids_map = index.fields_ids_map(&rtxn)?;
    let ids: Vec<u32> = index.documents_ids(&rtxn)?.into_iter().collect();

    let mut batches = Vec::with_capacity(ids.len().div_ceil(MERGE_READ_CHUNK));
    for chunk in ids.chunks(MERGE_READ_CHUNK) {
        let docs = index.documents(&rtxn, chunk.iter().copied())?;
        let mut objects = Vec::with_capacity(docs.len());
        for (_id, obkv) in docs {
            objects.push(milli::all_obkv_to_json(obkv, &fields_ids_map)?);
        }
        batches.push(objects);
    }

    Ok(batches)
}

/// Get the number of documents in the index
pub fn get_document_count(index: &Index) -> Result<u64> {
    let rtxn = index.read_txn()?;
    Ok(index.number_of_documents(&rtxn)?)
}

/// Get a document as a JSON object using an existing transaction
pub fn get_document(
    index: &Index,
    rtxn: &RoTxn<'_>,
    doc_id: u32,
) -> Result<Option<Map<String, Value>>> {
    let fields_ids_map = index.fields_ids_map(rtxn)?;

    let docs = index.documents(rtxn, [doc_id])?;
    if let Some((_id, obkv)) = docs.first() {
        let obj = milli::all_obkv_to_json(obkv, &fields_ids_map)?;
        Ok(Some(obj))
    } else {
        Ok(None)
    }
}

/// Get a document by its primary key
pub fn get_document_by_external_id(
    index: &Index,
    external_id: &str,
) -> Result<Option<Map<String, Value>>> {
    let rtxn = index.read_txn()?;

    let external_ids = index.external_documents_ids();
    match external_ids.get(&rtxn, external_id)? {
        Some(internal_id) => get_document(index, &rtxn, internal_id),
        None => Ok(None),
    }
}

/// Engine keys of every document in the index. Hashed ids are not mapped back.
pub fn all_document_ids(index: &Index) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for batch in read_all_documents(index)? {
        for object in batch {
            match object.get(PRIMARY_KEY) {
                Some(Value::String(id)) => ids.push(id.clone()),
                Some(other) => ids.push(other.to_string()),
                None => anyhow::bail!("Document without {} in index", PRIMARY_KEY),
            }
        }
    }
    Ok(ids)
}
