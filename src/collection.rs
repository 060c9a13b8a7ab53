// src/collection.rs
// Collection-level operations: document CRUD, index maintenance, and
// aggregation. One reader-writer lock per collection guards the
// document set, the metadata record, and every index of the collection,
// so index coherence is never observable-violated from outside.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::aggregation::Pipeline;
use crate::document::{Document, ID_FIELD};
use crate::error::{QuartzError, Result};
use crate::index::{validate_field_path, FieldIndex, IndexStore};
use crate::log_debug;
use crate::query::matches_filter;
use crate::query_planner::{plan_query, QueryPlan};
use crate::storage::{validate_document_id, CollectionMeta, DocumentStore};
use crate::value_utils::{canonical_key, resolve_path};

/// Everything the per-collection lock guards.
pub(crate) struct CollectionState {
    pub meta: CollectionMeta,
    /// Indexes of this collection, keyed by field path
    pub indexes: HashMap<String, FieldIndex>,
}

/// Handle to one collection. Clones share the same lock and state.
#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<DocumentStore>,
    index_store: Arc<IndexStore>,
    state: Arc<RwLock<CollectionState>>,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        store: Arc<DocumentStore>,
        index_store: Arc<IndexStore>,
        meta: CollectionMeta,
        indexes: HashMap<String, FieldIndex>,
    ) -> Self {
        Collection {
            name,
            store,
            index_store,
            state: Arc::new(RwLock::new(CollectionState { meta, indexes })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current metadata record.
    pub fn metadata(&self) -> CollectionMeta {
        self.state.read().meta.clone()
    }

    // ========== DOCUMENT OPERATIONS ==========

    /// Insert a document. A supplied `_id` is kept; a missing one gets a
    /// fresh UUID. Returns the stored document.
    pub fn insert_one(&self, value: Value) -> Result<Value> {
        let mut state = self.state.write();

        let doc = Document::from_value(value)?;
        validate_document_id(doc.id())?;
        if self.store.document_exists(&self.name, doc.id()) {
            return Err(QuartzError::DuplicateDocument(doc.id().to_string()));
        }

        // Document first, then count, then the indexes. An index write
        // failure surfaces as Internal and the document stands; the
        // recovery path is rebuild_index.
        self.store.write_document(&self.name, &doc)?;
        state.meta.document_count += 1;
        self.store.write_meta(&state.meta)?;

        for index in state.indexes.values_mut() {
            index.update_document(&doc);
            self.index_store.save(index)?;
        }

        log_debug!("collection '{}': inserted {}", self.name, doc.id());
        Ok(doc.into_value())
    }

    /// Find documents matching `filter`. The planner narrows candidates
    /// through one index when possible; the filter evaluator always
    /// re-checks the full criteria.
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        if !filter.is_object() {
            return Err(QuartzError::InvalidQuery(
                "Filter must be a JSON object".to_string(),
            ));
        }
        let state = self.state.read();

        let candidates = match plan_query(filter, &state.indexes) {
            QueryPlan::FullScan => self.store.read_all_documents(&self.name)?,
            QueryPlan::IndexCandidates { field, ids } => {
                log_debug!(
                    "collection '{}': index on '{}' narrowed to {} candidates",
                    self.name,
                    field,
                    ids.len()
                );
                let mut docs = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(doc) = self.store.read_document(&self.name, &id)? {
                        docs.push(doc);
                    }
                }
                docs
            }
        };

        let mut results = Vec::new();
        for doc in candidates {
            let value = doc.into_value();
            if matches_filter(&value, filter)? {
                results.push(value);
            }
        }
        Ok(results)
    }

    /// Load one document by identifier.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        let _state = self.state.read();
        Ok(self
            .store
            .read_document(&self.name, id)?
            .map(Document::into_value))
    }

    /// Apply an update spec (`$set` / `$unset`; unknown operators are
    /// ignored) to one document. `_id` never changes. Returns the
    /// updated document.
    pub fn update_one(&self, id: &str, update_spec: &Value) -> Result<Value> {
        let mut state = self.state.write();

        let mut doc = self
            .store
            .read_document(&self.name, id)?
            .ok_or_else(|| QuartzError::DocumentNotFound(id.to_string()))?;

        apply_update_operators(&mut doc, update_spec)?;

        self.store.write_document(&self.name, &doc)?;
        for index in state.indexes.values_mut() {
            index.update_document(&doc);
            self.index_store.save(index)?;
        }

        log_debug!("collection '{}': updated {}", self.name, id);
        Ok(doc.into_value())
    }

    /// Delete one document by identifier.
    pub fn delete_one(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();

        if !self.store.document_exists(&self.name, id) {
            return Err(QuartzError::DocumentNotFound(id.to_string()));
        }

        // Indexes first, then the file, then the count: a crash in
        // between never leaves an index entry for a live document.
        for index in state.indexes.values_mut() {
            index.remove_document(id);
            self.index_store.save(index)?;
        }
        self.store.delete_document(&self.name, id)?;
        state.meta.document_count = state.meta.document_count.saturating_sub(1);
        self.store.write_meta(&state.meta)?;

        log_debug!("collection '{}': deleted {}", self.name, id);
        Ok(())
    }

    /// Number of documents matching `filter`.
    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        if filter.as_object().map_or(false, |o| o.is_empty()) {
            return Ok(self.state.read().meta.document_count);
        }
        Ok(self.find(filter)?.len() as u64)
    }

    /// Distinct values of `field` over matching documents, in
    /// first-encounter order.
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut values = Vec::new();
        for doc in self.find(filter)? {
            if let Some(value) = resolve_path(&doc, field) {
                if seen.insert(canonical_key(value)) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    // ========== INDEX OPERATIONS ==========

    /// Create (or overwrite) the index on `field` from the current
    /// collection contents.
    pub fn create_index(&self, field: &str) -> Result<FieldIndex> {
        validate_field_path(field)?;
        let mut state = self.state.write();

        let docs = self.store.read_all_documents(&self.name)?;
        let index = FieldIndex::build(&self.name, field, &docs);
        self.index_store.save(&index)?;
        state.indexes.insert(field.to_string(), index.clone());

        log_debug!(
            "collection '{}': indexed '{}' ({} entries)",
            self.name,
            field,
            index.entry_count()
        );
        Ok(index)
    }

    /// Re-scan the collection and replace the index map. The recovery
    /// path after a failed post-mutation index write.
    pub fn rebuild_index(&self, field: &str) -> Result<FieldIndex> {
        let mut state = self.state.write();

        let created = match state.indexes.get(field) {
            Some(existing) => existing.created,
            None => return Err(QuartzError::IndexNotFound(field.to_string())),
        };

        let docs = self.store.read_all_documents(&self.name)?;
        let mut index = FieldIndex::build(&self.name, field, &docs);
        index.created = created;
        self.index_store.save(&index)?;
        state.indexes.insert(field.to_string(), index.clone());
        Ok(index)
    }

    pub fn get_index(&self, field: &str) -> Result<FieldIndex> {
        self.state
            .read()
            .indexes
            .get(field)
            .cloned()
            .ok_or_else(|| QuartzError::IndexNotFound(field.to_string()))
    }

    /// All indexes of the collection, ordered by field.
    pub fn list_indexes(&self) -> Vec<FieldIndex> {
        let state = self.state.read();
        let mut indexes: Vec<FieldIndex> = state.indexes.values().cloned().collect();
        indexes.sort_by(|a, b| a.field.cmp(&b.field));
        indexes
    }

    pub fn drop_index(&self, field: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.indexes.remove(field).is_none() {
            return Err(QuartzError::IndexNotFound(field.to_string()));
        }
        self.index_store.delete(&self.name, field)
    }

    // ========== AGGREGATION ==========

    /// Run an aggregation pipeline over the whole collection.
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        let docs: Vec<Value> = {
            let _state = self.state.read();
            self.store
                .read_all_documents(&self.name)?
                .into_iter()
                .map(Document::into_value)
                .collect()
        };
        pipeline.execute(docs)
    }

    // ========== TEARDOWN ==========

    /// Remove the collection's documents, metadata, and indexes from
    /// disk. Called by the database after unregistering the handle.
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut state = self.state.write();
        state.indexes.clear();
        self.index_store.delete_collection(&self.name)?;
        self.store.delete_collection(&self.name)
    }
}

/// Apply `$set` / `$unset` entries to a document. Unknown top-level
/// operators are ignored. Entries naming `_id` (or paths under it) are
/// skipped: the identifier never changes.
fn apply_update_operators(doc: &mut Document, update_spec: &Value) -> Result<()> {
    let ops = update_spec.as_object().ok_or_else(|| {
        QuartzError::InvalidQuery("Update spec must be a JSON object".to_string())
    })?;

    for (op, args) in ops {
        match op.as_str() {
            "$set" => {
                let fields = args.as_object().ok_or_else(|| {
                    QuartzError::InvalidQuery("$set takes an object of field paths".to_string())
                })?;
                for (path, value) in fields {
                    if targets_id(path) {
                        continue;
                    }
                    doc.set_path(path, value.clone());
                }
            }
            "$unset" => {
                let fields = args.as_object().ok_or_else(|| {
                    QuartzError::InvalidQuery("$unset takes an object of field paths".to_string())
                })?;
                for path in fields.keys() {
                    if targets_id(path) {
                        continue;
                    }
                    doc.remove_path(path);
                }
            }
            other => {
                log_debug!("ignoring unknown update operator '{}'", other);
            }
        }
    }
    Ok(())
}

fn targets_id(path: &str) -> bool {
    path == ID_FIELD || path.starts_with("_id.")
}
