// src/index.rs
// Secondary indexes: per (collection, field) an inverted map from
// canonical value-key to the ordered list of document identifiers.

use crate::document::Document;
use crate::error::{QuartzError, Result};
use crate::value_utils::canonical_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key encoding recorded in every index file so rebuilds are
/// deterministic across versions.
pub const KEY_ENCODING: &str = "canonical-json";

fn default_key_encoding() -> String {
    KEY_ENCODING.to_string()
}

/// One secondary index over a single field of a collection.
///
/// Buckets are a `BTreeMap` so the persisted record is deterministic.
/// Invariants maintained by every mutation:
/// - a live document id appears under exactly one key (the canonical
///   encoding of its field value), or nowhere if the field is missing
/// - no bucket is ever an empty list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldIndex {
    pub collection_name: String,
    pub field: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default = "default_key_encoding")]
    pub key_encoding: String,
    pub index: BTreeMap<String, Vec<String>>,
}

impl FieldIndex {
    /// Empty index over `field`.
    pub fn new(collection: &str, field: &str) -> Self {
        let now = Utc::now();
        FieldIndex {
            collection_name: collection.to_string(),
            field: field.to_string(),
            created: now,
            updated: now,
            key_encoding: default_key_encoding(),
            index: BTreeMap::new(),
        }
    }

    /// Build the index by scanning `documents`. Documents whose field
    /// resolves to missing are not indexed.
    pub fn build(collection: &str, field: &str, documents: &[Document]) -> Self {
        let mut built = FieldIndex::new(collection, field);
        for doc in documents {
            built.add_document(doc);
        }
        built
    }

    /// Insert the document into the bucket of its current field value.
    /// A no-op when the field is missing.
    pub fn add_document(&mut self, doc: &Document) {
        if let Some(value) = doc.get(&self.field) {
            let key = canonical_key(value);
            let bucket = self.index.entry(key).or_default();
            if !bucket.iter().any(|id| id == doc.id()) {
                bucket.push(doc.id().to_string());
            }
            self.updated = Utc::now();
        }
    }

    /// Remove an identifier from every bucket, dropping emptied buckets.
    pub fn remove_document(&mut self, id: &str) {
        let mut emptied = Vec::new();
        for (key, bucket) in self.index.iter_mut() {
            bucket.retain(|entry| entry != id);
            if bucket.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.index.remove(&key);
        }
        self.updated = Utc::now();
    }

    /// Re-index one document after a mutation: clear its old entry, then
    /// insert it under the current value (unless the field is missing).
    pub fn update_document(&mut self, doc: &Document) {
        self.remove_document(doc.id());
        self.add_document(doc);
    }

    /// Identifiers stored under a canonical key.
    pub fn bucket(&self, key: &str) -> Option<&Vec<String>> {
        self.index.get(key)
    }

    /// Total number of indexed identifiers.
    pub fn entry_count(&self) -> usize {
        self.index.values().map(|ids| ids.len()).sum()
    }
}

/// Reject field paths that cannot safely name an index file.
pub fn validate_field_path(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(QuartzError::InvalidName(
            "index field must not be empty".to_string(),
        ));
    }
    if field.contains('/') || field.contains('\\') || field.contains('\0') {
        return Err(QuartzError::InvalidName(format!(
            "index field contains path characters: {}",
            field
        )));
    }
    Ok(())
}

/// On-disk home of the index records: one JSON file per index at
/// `<dir>/<collection>_<field>.json`. Collection names contain no
/// underscore (enforced at creation), so the filename splits
/// unambiguously on the first `_`.
#[derive(Debug)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(IndexStore {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn file_path(&self, collection: &str, field: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.json", collection, field))
    }

    /// Load every persisted index belonging to `collection`, keyed by
    /// field. Files that fail to parse are skipped with a warning; the
    /// recovery path is `rebuild_index`.
    pub fn load_collection(&self, collection: &str) -> Result<HashMap<String, FieldIndex>> {
        let mut loaded = HashMap::new();
        let prefix = format!("{}_", collection);

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }

            let text = fs::read_to_string(entry.path())?;
            match serde_json::from_str::<FieldIndex>(&text) {
                Ok(index) if index.collection_name == collection => {
                    loaded.insert(index.field.clone(), index);
                }
                Ok(_) => {}
                Err(e) => {
                    crate::log_warn!("Skipping unreadable index file {}: {}", name, e);
                }
            }
        }

        Ok(loaded)
    }

    /// Persist one index record: write to a temp file, then rename over
    /// the final path so readers never see a torn record.
    pub fn save(&self, index: &FieldIndex) -> Result<()> {
        let final_path = self.file_path(&index.collection_name, &index.field);
        let tmp_path = final_path.with_extension("json.tmp");

        let text = serde_json::to_string_pretty(index)?;
        fs::write(&tmp_path, text)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Delete one index file. Missing files are fine; the in-memory
    /// registry is the source of NotFound errors.
    pub fn delete(&self, collection: &str, field: &str) -> Result<()> {
        let path = self.file_path(collection, field);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Delete every index file belonging to `collection`.
    pub fn delete_collection(&self, collection: &str) -> Result<()> {
        let prefix = format!("{}_", collection);
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&prefix) && name.ends_with(".json") {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_build_skips_missing_fields() {
        let docs = vec![
            doc(json!({"_id": "a", "city": "NYC"})),
            doc(json!({"_id": "b", "city": "NYC"})),
            doc(json!({"_id": "c"})),
        ];
        let index = FieldIndex::build("users", "city", &docs);

        assert_eq!(index.entry_count(), 2);
        assert_eq!(
            index.bucket("\"NYC\""),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_remove_document_cleans_empty_buckets() {
        let docs = vec![doc(json!({"_id": "a", "n": 1}))];
        let mut index = FieldIndex::build("t", "n", &docs);
        assert_eq!(index.index.len(), 1);

        index.remove_document("a");
        assert!(index.index.is_empty());
    }

    #[test]
    fn test_update_document_moves_bucket() {
        let mut index = FieldIndex::new("t", "n");
        index.add_document(&doc(json!({"_id": "a", "n": 1})));

        index.update_document(&doc(json!({"_id": "a", "n": 2})));
        assert_eq!(index.bucket("1"), None);
        assert_eq!(index.bucket("2"), Some(&vec!["a".to_string()]));

        // value gone: id must leave the index entirely
        index.update_document(&doc(json!({"_id": "a"})));
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_add_document_is_idempotent_per_id() {
        let mut index = FieldIndex::new("t", "n");
        let d = doc(json!({"_id": "a", "n": 1}));
        index.add_document(&d);
        index.add_document(&d);
        assert_eq!(index.bucket("1"), Some(&vec!["a".to_string()]));
    }

    #[test]
    fn test_numeric_forms_share_bucket() {
        let mut index = FieldIndex::new("t", "n");
        index.add_document(&doc(json!({"_id": "a", "n": 2})));
        index.add_document(&doc(json!({"_id": "b", "n": 2.0})));
        assert_eq!(index.index.len(), 1);
        assert_eq!(index.bucket("2").map(|b| b.len()), Some(2));
    }

    #[test]
    fn test_nested_field_indexing() {
        let mut index = FieldIndex::new("t", "address.city");
        index.add_document(&doc(json!({"_id": "a", "address": {"city": "NYC"}})));
        index.add_document(&doc(json!({"_id": "b", "address": {}})));
        assert_eq!(index.bucket("\"NYC\""), Some(&vec!["a".to_string()]));
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_store_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();

        let docs = vec![
            doc(json!({"_id": "a", "age": 30})),
            doc(json!({"_id": "b", "age": 25})),
        ];
        let index = FieldIndex::build("users", "age", &docs);
        store.save(&index).unwrap();

        let loaded = store.load_collection("users").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["age"], index);
    }

    #[test]
    fn test_store_delete_leaves_no_trace() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();

        store.save(&FieldIndex::new("users", "age")).unwrap();
        store.delete("users", "age").unwrap();

        let remaining: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_store_delete_collection_is_scoped() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();

        store.save(&FieldIndex::new("users", "age")).unwrap();
        store.save(&FieldIndex::new("users", "city")).unwrap();
        store.save(&FieldIndex::new("orders", "total")).unwrap();

        store.delete_collection("users").unwrap();

        assert!(store.load_collection("users").unwrap().is_empty());
        assert_eq!(store.load_collection("orders").unwrap().len(), 1);
    }

    #[test]
    fn test_validate_field_path() {
        assert!(validate_field_path("customerId").is_ok());
        assert!(validate_field_path("address.city").is_ok());
        assert!(validate_field_path("").is_err());
        assert!(validate_field_path("a/b").is_err());
    }
}
