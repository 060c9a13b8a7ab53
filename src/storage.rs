// src/storage.rs
// On-disk layout of the database:
//
//   <root>/db_info.json                      database record
//   <root>/collections/<name>/metadata.json  collection record
//   <root>/collections/<name>/<id>.json      one document per file
//   <root>/indexes/<collection>_<field>.json index records (index.rs)

use crate::document::Document;
use crate::error::{QuartzError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Database record, persisted once at `db_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: String,
    pub created: DateTime<Utc>,
    pub collections: Vec<String>,
}

impl DatabaseInfo {
    pub fn new(name: &str) -> Self {
        DatabaseInfo {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            collections: Vec::new(),
        }
    }
}

/// Collection record, persisted at `collections/<name>/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMeta {
    pub name: String,
    pub created: DateTime<Utc>,
    pub document_count: u64,
}

impl CollectionMeta {
    pub fn new(name: &str) -> Self {
        CollectionMeta {
            name: name.to_string(),
            created: Utc::now(),
            document_count: 0,
        }
    }
}

/// Collection names become directory names and the prefix of index
/// filenames (`<collection>_<field>.json`), so no underscore and no path
/// characters.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(QuartzError::InvalidName(
            "collection name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(QuartzError::InvalidName(format!(
            "collection name may only contain letters, digits, and '-': {}",
            name
        )));
    }
    Ok(())
}

/// Document identifiers become filenames.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(QuartzError::InvalidName(
            "document _id must not be empty".to_string(),
        ));
    }
    if id.contains('/') || id.contains('\\') || id.contains('\0') || id.starts_with('.') {
        return Err(QuartzError::InvalidName(format!(
            "document _id contains path characters: {}",
            id
        )));
    }
    if id == "metadata" {
        return Err(QuartzError::InvalidName(
            "document _id 'metadata' is reserved".to_string(),
        ));
    }
    Ok(())
}

/// Filesystem access for documents and collection metadata. All
/// serialization is pretty-printed JSON; every write goes through a temp
/// file and an atomic rename.
#[derive(Debug)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open (or initialize) the data directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("collections"))?;
        Ok(DocumentStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    fn info_path(&self) -> PathBuf {
        self.root.join("db_info.json")
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join("collections").join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.collection_dir(name).join("metadata.json")
    }

    fn doc_path(&self, name: &str, id: &str) -> PathBuf {
        self.collection_dir(name).join(format!("{}.json", id))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    // ========== DATABASE INFO ==========

    /// Load the database record, creating it on first use.
    pub fn load_or_init_info(&self, db_name: &str) -> Result<DatabaseInfo> {
        let path = self.info_path();
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text)?)
        } else {
            let info = DatabaseInfo::new(db_name);
            self.write_json(&path, &info)?;
            Ok(info)
        }
    }

    pub fn save_info(&self, info: &DatabaseInfo) -> Result<()> {
        self.write_json(&self.info_path(), info)
    }

    // ========== COLLECTION METADATA ==========

    pub fn collection_exists(&self, name: &str) -> bool {
        self.meta_path(name).exists()
    }

    /// Create the collection directory and its metadata record.
    pub fn create_collection(&self, name: &str) -> Result<CollectionMeta> {
        let meta = CollectionMeta::new(name);
        fs::create_dir_all(self.collection_dir(name))?;
        self.write_meta(&meta)?;
        Ok(meta)
    }

    pub fn read_meta(&self, name: &str) -> Result<CollectionMeta> {
        let path = self.meta_path(name);
        if !path.exists() {
            return Err(QuartzError::CollectionNotFound(name.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write_meta(&self, meta: &CollectionMeta) -> Result<()> {
        self.write_json(&self.meta_path(&meta.name), meta)
    }

    /// Remove the collection directory with everything in it.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let dir = self.collection_dir(name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    // ========== DOCUMENTS ==========

    pub fn document_exists(&self, name: &str, id: &str) -> bool {
        self.doc_path(name, id).exists()
    }

    pub fn write_document(&self, name: &str, doc: &Document) -> Result<()> {
        self.write_json(&self.doc_path(name, doc.id()), doc)
    }

    pub fn read_document(&self, name: &str, id: &str) -> Result<Option<Document>> {
        let path = self.doc_path(name, id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&text)?;
        Ok(Some(Document::from_value(value)?))
    }

    pub fn delete_document(&self, name: &str, id: &str) -> Result<()> {
        let path = self.doc_path(name, id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Identifiers of every document file in the collection directory.
    pub fn list_document_ids(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.collection_dir(name);
        if !dir.exists() {
            return Err(QuartzError::CollectionNotFound(name.to_string()));
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(file_name) = entry.file_name().to_str() {
                if file_name == "metadata.json" {
                    continue;
                }
                if let Some(id) = file_name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every document of the collection.
    pub fn read_all_documents(&self, name: &str) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for id in self.list_document_ids(name)? {
            if let Some(doc) = self.read_document(name, &id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}
