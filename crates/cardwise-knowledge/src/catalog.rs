//! Document corpus loader: turns raw catalog records into documents.

use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::types::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One row of the card catalog as produced by the spreadsheet export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub name: String,
    pub description: String,
}

impl CatalogRecord {
    /// `id = name`, `content = description`, `metadata = {name}`.
    pub fn into_document(self) -> Document {
        let name = self.name;
        Document::new(name.clone(), self.description).with_metadata("name", name)
    }
}

fn required_str(record: &serde_json::Value, index: usize, field: &'static str) -> Result<String> {
    record
        .get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or(CardwiseError::MalformedRecord { index, field })
}

/// Validate raw JSON records and convert each into a document.
///
/// Extra fields are ignored. A missing or non-string `name`/`description`,
/// an empty name, or a repeated name fails the whole load.
pub fn load_documents(records: &[serde_json::Value]) -> Result<Vec<Document>> {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(records.len());

    for (index, raw) in records.iter().enumerate() {
        let name = required_str(raw, index, "name")?;
        if name.trim().is_empty() {
            return Err(CardwiseError::MalformedRecord { index, field: "name" });
        }
        let description = required_str(raw, index, "description")?;

        if !seen.insert(name.clone()) {
            return Err(CardwiseError::DuplicateDocument(name));
        }
        documents.push(CatalogRecord { name, description }.into_document());
    }
    Ok(documents)
}

/// Read a JSON array of catalog records from disk.
pub fn load_catalog_file(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let records = value.as_array().ok_or_else(|| {
        CardwiseError::Config(format!("{} must contain a JSON array", path.display()))
    })?;
    let documents = load_documents(records)?;
    tracing::info!("Loaded {} catalog documents from {}", documents.len(), path.display());
    Ok(documents)
}
