//! JSON Lines document input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use fanindex_core::Document;

/// Read one document per line from `path`.
pub fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    parse_documents(BufReader::new(file))
}

/// Parse JSON Lines; blank lines are skipped.
pub fn parse_documents(reader: impl BufRead) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Document =
            serde_json::from_str(&line).with_context(|| format!("Invalid document on line {}", i + 1))?;
        documents.push(document);
    }
    Ok(documents)
}
