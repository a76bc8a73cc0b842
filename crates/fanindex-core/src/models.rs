//! Documents as handed to the bulk builder, and their mapping to engine objects.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Primary key of every store. Documents without it get a generated UUID.
pub const PRIMARY_KEY: &str = "doc_id";

/// Holds the caller's `doc_id` when it cannot be used as an engine key.
pub const SOURCE_ID_FIELD: &str = "_doc_id";

/// Longest primary key milli accepts.
const MAX_KEY_BYTES: usize = 511;

/// Engine key for a document id.
///
/// Ids made of ASCII alphanumerics, `-` and `_` that fit milli's key limit
/// are used as is. Anything else maps to `h-` plus its blake3 digest.
pub fn engine_key(doc_id: &str) -> String {
    let usable = !doc_id.is_empty()
        && doc_id.len() <= MAX_KEY_BYTES
        && doc_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if usable {
        doc_id.to_string()
    } else {
        format!("h-{}", blake3::hash(doc_id.as_bytes()).to_hex())
    }
}

/// Put the caller's id back into `doc_id` on an object read from a store.
pub fn restore_doc_id(object: &mut Map<String, Value>) {
    if let Some(source) = object.remove(SOURCE_ID_FIELD) {
        object.insert(PRIMARY_KEY.to_string(), source);
    }
}

fn default_store() -> bool {
    true
}

/// One named field of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub value: String,
    /// Retrievable in original form
    #[serde(default = "default_store")]
    pub store: bool,
    /// Tokenized for full-text search; otherwise matched exactly
    #[serde(default)]
    pub analysis: bool,
}

impl IndexField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, store: bool, analysis: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            store,
            analysis,
        }
    }
}

/// An ordered collection of fields. Serializes as a JSON array of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Vec<IndexField>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: IndexField) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a stored, analyzed text field
    pub fn stored_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(IndexField::new(name, value, true, true))
    }

    /// Add a stored, exact-match field
    pub fn keyword(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(IndexField::new(name, value, true, false))
    }

    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// The explicit `doc_id` value, if the document carries one.
    pub fn doc_id(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == PRIMARY_KEY)
            .map(|f| f.value.as_str())
    }

    /// Convert into the JSON object the engine ingests.
    ///
    /// Repeated field names become arrays. A document without `doc_id`
    /// receives a random one; an id that is not a valid engine key is
    /// replaced by [`engine_key`] and kept in [`SOURCE_ID_FIELD`].
    pub fn to_object(&self) -> Result<Map<String, Value>> {
        let mut object = Map::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::InvalidDocument("field name must not be empty".to_string()));
            }
            if field.name == SOURCE_ID_FIELD {
                return Err(Error::InvalidDocument(format!(
                    "field name {} is reserved",
                    SOURCE_ID_FIELD
                )));
            }
            let value = Value::String(field.value.clone());
            match object.get_mut(&field.name) {
                None => {
                    object.insert(field.name.clone(), value);
                }
                Some(_) if field.name == PRIMARY_KEY => {
                    return Err(Error::InvalidDocument(format!(
                        "{} must appear at most once",
                        PRIMARY_KEY
                    )));
                }
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }

        match self.doc_id() {
            Some(doc_id) => {
                let key = engine_key(doc_id);
                if key != doc_id {
                    object.insert(SOURCE_ID_FIELD.to_string(), Value::String(doc_id.to_string()));
                    object.insert(PRIMARY_KEY.to_string(), Value::String(key));
                }
            }
            None => {
                object.insert(
                    PRIMARY_KEY.to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
            }
        }

        Ok(object)
    }
}

/// Per-field indexing behaviour derived from a batch.
///
/// Analyzed fields are searchable, the rest are exact-match filterable, and
/// stored fields are displayed. `doc_id` is always displayed. Unnamed fields
/// are ignored here and rejected on conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    pub searchable: BTreeSet<String>,
    pub filterable: BTreeSet<String>,
    pub displayed: BTreeSet<String>,
}

impl FieldSchema {
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        let mut schema = Self::default();
        schema.displayed.insert(PRIMARY_KEY.to_string());
        for document in documents {
            for field in document.fields().iter().filter(|f| !f.name.is_empty()) {
                if field.analysis {
                    schema.searchable.insert(field.name.clone());
                } else {
                    schema.filterable.insert(field.name.clone());
                }
                if field.store {
                    schema.displayed.insert(field.name.clone());
                }
            }
        }
        schema
    }

    /// Combine with another schema, keeping every field either one mentions.
    pub fn union(&self, other: &FieldSchema) -> FieldSchema {
        FieldSchema {
            searchable: self.searchable.union(&other.searchable).cloned().collect(),
            filterable: self.filterable.union(&other.filterable).cloned().collect(),
            displayed: self.displayed.union(&other.displayed).cloned().collect(),
        }
    }
}
