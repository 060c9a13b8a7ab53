// src/database.rs
// Database: owns the two stores, the database info record, and the
// per-collection handles. This is the surface the HTTP layer consumes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::collection::Collection;
use crate::error::{QuartzError, Result};
use crate::index::{FieldIndex, IndexStore};
use crate::storage::{validate_collection_name, CollectionMeta, DatabaseInfo, DocumentStore};
use crate::{log_info, log_warn};

/// A QuartzDB database rooted at one data directory.
pub struct Database {
    store: Arc<DocumentStore>,
    index_store: Arc<IndexStore>,
    info: RwLock<DatabaseInfo>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl Database {
    /// Open (or initialize) a database at `path`. Existing collections
    /// and their persisted indexes are loaded into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Arc::new(DocumentStore::open(&path)?);
        let index_store = Arc::new(IndexStore::open(store.indexes_dir())?);

        let db_name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("quartz");
        let info = store.load_or_init_info(db_name)?;

        let mut collections = HashMap::new();
        for name in &info.collections {
            if !store.collection_exists(name) {
                log_warn!("collection '{}' is registered but has no directory", name);
                continue;
            }
            let meta = store.read_meta(name)?;
            let indexes = index_store.load_collection(name)?;
            collections.insert(
                name.clone(),
                Collection::new(
                    name.clone(),
                    Arc::clone(&store),
                    Arc::clone(&index_store),
                    meta,
                    indexes,
                ),
            );
        }

        log_info!(
            "opened database '{}' with {} collections",
            info.name,
            collections.len()
        );

        Ok(Database {
            store,
            index_store,
            info: RwLock::new(info),
            collections: RwLock::new(collections),
        })
    }

    /// Copy of the database record.
    pub fn info(&self) -> DatabaseInfo {
        self.info.read().clone()
    }

    // ========== COLLECTIONS ==========

    /// Create a collection. Fails with `CollectionExists` on a name
    /// collision and `InvalidName` on an unusable name.
    pub fn create_collection(&self, name: &str) -> Result<CollectionMeta> {
        validate_collection_name(name)?;

        let mut collections = self.collections.write();
        if collections.contains_key(name) || self.store.collection_exists(name) {
            return Err(QuartzError::CollectionExists(name.to_string()));
        }

        let meta = self.store.create_collection(name)?;
        {
            let mut info = self.info.write();
            info.collections.push(name.to_string());
            self.store.save_info(&info)?;
        }

        collections.insert(
            name.to_string(),
            Collection::new(
                name.to_string(),
                Arc::clone(&self.store),
                Arc::clone(&self.index_store),
                meta.clone(),
                HashMap::new(),
            ),
        );

        log_info!("created collection '{}'", name);
        Ok(meta)
    }

    /// Metadata of every collection, ordered by name.
    pub fn list_collections(&self) -> Vec<CollectionMeta> {
        let collections = self.collections.read();
        let mut metas: Vec<CollectionMeta> =
            collections.values().map(Collection::metadata).collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
    }

    /// Delete a collection with its documents, metadata, and indexes.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .remove(name)
            .ok_or_else(|| QuartzError::CollectionNotFound(name.to_string()))?;

        // destroy() takes the collection's exclusive lock, so in-flight
        // operations drain before the files disappear.
        collection.destroy()?;

        let mut info = self.info.write();
        info.collections.retain(|n| n != name);
        self.store.save_info(&info)?;

        log_info!("deleted collection '{}'", name);
        Ok(())
    }

    /// Handle to a collection.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuartzError::CollectionNotFound(name.to_string()))
    }

    // ========== DOCUMENTS ==========

    pub fn insert_document(&self, collection: &str, doc: Value) -> Result<Value> {
        self.collection(collection)?.insert_one(doc)
    }

    pub fn find_documents(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        self.collection(collection)?.find(filter)
    }

    pub fn update_document(
        &self,
        collection: &str,
        id: &str,
        update_spec: &Value,
    ) -> Result<Value> {
        self.collection(collection)?.update_one(id, update_spec)
    }

    pub fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.collection(collection)?.delete_one(id)
    }

    pub fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64> {
        self.collection(collection)?.count_documents(filter)
    }

    pub fn distinct(&self, collection: &str, field: &str, filter: &Value) -> Result<Vec<Value>> {
        self.collection(collection)?.distinct(field, filter)
    }

    // ========== INDEXES ==========

    pub fn create_index(&self, collection: &str, field: &str) -> Result<FieldIndex> {
        self.collection(collection)?.create_index(field)
    }

    pub fn rebuild_index(&self, collection: &str, field: &str) -> Result<FieldIndex> {
        self.collection(collection)?.rebuild_index(field)
    }

    pub fn get_index(&self, collection: &str, field: &str) -> Result<FieldIndex> {
        self.collection(collection)?.get_index(field)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<FieldIndex>> {
        Ok(self.collection(collection)?.list_indexes())
    }

    pub fn delete_index(&self, collection: &str, field: &str) -> Result<()> {
        self.collection(collection)?.drop_index(field)
    }

    // ========== AGGREGATION ==========

    pub fn aggregate(&self, collection: &str, pipeline: &Value) -> Result<Vec<Value>> {
        self.collection(collection)?.aggregate(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn database() -> (TempDir, Database) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path().join("data")).unwrap();
        (tmp, db)
    }

    #[test]
    fn test_create_and_list_collections() {
        let (_tmp, db) = database();
        db.create_collection("users").unwrap();
        db.create_collection("orders").unwrap();

        let names: Vec<String> = db
            .list_collections()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["orders", "users"]);
    }

    #[test]
    fn test_create_collection_name_collision() {
        let (_tmp, db) = database();
        db.create_collection("users").unwrap();
        assert!(matches!(
            db.create_collection("users").unwrap_err(),
            QuartzError::CollectionExists(_)
        ));
    }

    #[test]
    fn test_create_collection_invalid_name() {
        let (_tmp, db) = database();
        assert!(matches!(
            db.create_collection("my_users").unwrap_err(),
            QuartzError::InvalidName(_)
        ));
        assert!(matches!(
            db.create_collection("").unwrap_err(),
            QuartzError::InvalidName(_)
        ));
    }

    #[test]
    fn test_delete_collection_drops_indexes() {
        let (tmp, db) = database();
        db.create_collection("users").unwrap();
        db.insert_document("users", json!({"_id": "u1", "age": 30})).unwrap();
        db.create_index("users", "age").unwrap();

        db.delete_collection("users").unwrap();
        assert!(matches!(
            db.find_documents("users", &json!({})).unwrap_err(),
            QuartzError::CollectionNotFound(_)
        ));

        // no index file survives
        let index_dir = tmp.path().join("data/indexes");
        let leftovers: Vec<_> = std::fs::read_dir(index_dir).unwrap().collect();
        assert!(leftovers.is_empty());

        assert!(matches!(
            db.delete_collection("users").unwrap_err(),
            QuartzError::CollectionNotFound(_)
        ));
    }

    #[test]
    fn test_reopen_restores_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");

        {
            let db = Database::open(&path).unwrap();
            db.create_collection("orders").unwrap();
            db.insert_document(
                "orders",
                json!({"_id": "o1", "customerId": "cust001", "total": 129.99}),
            )
            .unwrap();
            db.create_index("orders", "customerId").unwrap();
        }

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.list_collections().len(), 1);
        assert_eq!(reopened.list_collections()[0].document_count, 1);

        let found = reopened
            .find_documents("orders", &json!({"customerId": "cust001"}))
            .unwrap();
        assert_eq!(found.len(), 1);

        let index = reopened.get_index("orders", "customerId").unwrap();
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_info_tracks_collections() {
        let (_tmp, db) = database();
        db.create_collection("a").unwrap();
        db.create_collection("b").unwrap();
        db.delete_collection("a").unwrap();

        let info = db.info();
        assert_eq!(info.collections, vec!["b"]);
        assert!(!info.version.is_empty());
    }

    #[test]
    fn test_operations_on_missing_collection() {
        let (_tmp, db) = database();
        assert!(matches!(
            db.insert_document("nope", json!({})).unwrap_err(),
            QuartzError::CollectionNotFound(_)
        ));
        assert!(matches!(
            db.aggregate("nope", &json!([{"$count": "n"}])).unwrap_err(),
            QuartzError::CollectionNotFound(_)
        ));
        assert!(matches!(
            db.list_indexes("nope").unwrap_err(),
            QuartzError::CollectionNotFound(_)
        ));
    }
}
