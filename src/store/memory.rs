// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory document store.
//!
//! Stores collections in insertion order, enforces `_id` uniqueness and
//! unique indexes, evaluates filters with [`matches_filter`], and records
//! every operation so tests can assert exactly what the engine did.
//!
//! Failure injection:
//! - [`with_validator`](MemoryStore::with_validator) rejects documents (like a
//!   server-side `$jsonSchema` validator)
//! - [`with_failing_collection`](MemoryStore::with_failing_collection) makes
//!   reads of one collection fail
//! - [`with_failing_listing`](MemoryStore::with_failing_listing) makes
//!   `list_collections` fail

use super::filter::{compare_values, matches_filter};
use super::{BoxFuture, DocumentStore, DocumentStream, StoreResult, WriteOutcome};
use crate::error::StoreError;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Document validator: `Err(reason)` rejects the document.
pub type Validator = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    ListCollections,
    Count { collection: String },
    Find { collection: String },
    FindOne { collection: String },
    InsertOne { collection: String },
    DeleteOne { collection: String },
    DeleteAll { collection: String },
    InsertMany { collection: String, documents: usize },
    UpsertMany { collection: String, documents: usize },
    ListIndexes { collection: String },
    CreateIndex { collection: String, name: String },
}

impl StoreOp {
    /// Whether this call can modify the store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::InsertOne { .. }
                | Self::DeleteOne { .. }
                | Self::DeleteAll { .. }
                | Self::InsertMany { .. }
                | Self::UpsertMany { .. }
                | Self::CreateIndex { .. }
        )
    }

    /// Collection the call touched, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Self::ListCollections => None,
            Self::Count { collection }
            | Self::Find { collection }
            | Self::FindOne { collection }
            | Self::InsertOne { collection }
            | Self::DeleteOne { collection }
            | Self::DeleteAll { collection }
            | Self::InsertMany { collection, .. }
            | Self::UpsertMany { collection, .. }
            | Self::ListIndexes { collection }
            | Self::CreateIndex { collection, .. } => Some(collection),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryCollection {
    name: String,
    documents: Vec<Document>,
    indexes: Vec<Document>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: Vec::new(),
            indexes: vec![doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }],
        }
    }

    fn position_by_id(&self, id: &Bson) -> Option<usize> {
        self.documents.iter().position(|d| d.get("_id") == Some(id))
    }

    /// Check unique indexes other than `_id` against a candidate document.
    ///
    /// `skip` is the position of the document being replaced, if any.
    fn unique_violation(&self, candidate: &Document, skip: Option<usize>) -> Option<String> {
        for index in &self.indexes {
            if !index.get_bool("unique").unwrap_or(false) {
                continue;
            }
            let Ok(keys) = index.get_document("key") else { continue };
            let fields: Vec<&String> = keys.keys().collect();
            let candidate_key: Vec<Option<&Bson>> = fields.iter().map(|f| candidate.get(f.as_str())).collect();
            let clash = self.documents.iter().enumerate().any(|(pos, existing)| {
                Some(pos) != skip
                    && fields
                        .iter()
                        .zip(&candidate_key)
                        .all(|(f, v)| existing.get(f.as_str()) == *v)
            });
            if clash {
                let name = index.get_str("name").unwrap_or("unique index");
                return Some(format!("E11000 duplicate key error, index {name}"));
            }
        }
        None
    }
}

#[derive(Default)]
struct MemoryState {
    collections: Vec<MemoryCollection>,
}

impl MemoryState {
    fn get(&self, name: &str) -> Option<&MemoryCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn get_or_create(&mut self, name: &str) -> &mut MemoryCollection {
        if let Some(pos) = self.collections.iter().position(|c| c.name == name) {
            return &mut self.collections[pos];
        }
        self.collections.push(MemoryCollection::new(name));
        let last = self.collections.len() - 1;
        &mut self.collections[last]
    }
}

/// In-memory [`DocumentStore`] that records all calls.
///
/// # Example
/// ```rust
/// use collection_replicator::store::MemoryStore;
/// use bson::doc;
///
/// let source = MemoryStore::new("source")
///     .with_collection("users", vec![doc! { "_id": 1, "name": "ada" }]);
/// ```
pub struct MemoryStore {
    name: String,
    state: RwLock<MemoryState>,
    operations: RwLock<Vec<StoreOp>>,
    validator: Option<Validator>,
    failing_collections: HashSet<String>,
    fail_listing: bool,
    close_count: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
            operations: RwLock::new(Vec::new()),
            validator: None,
            failing_collections: HashSet::new(),
            fail_listing: false,
            close_count: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Seed a collection (created even when `documents` is empty).
    ///
    /// Documents without `_id` get a generated ObjectId.
    pub fn with_collection(mut self, name: &str, documents: Vec<Document>) -> Self {
        let collection = self.state.get_mut().get_or_create(name);
        for mut document in documents {
            ensure_id(&mut document);
            collection.documents.push(document);
        }
        self
    }

    /// Seed a raw index specification on a collection.
    pub fn with_index(mut self, collection: &str, spec: Document) -> Self {
        self.state.get_mut().get_or_create(collection).indexes.push(spec);
        self
    }

    /// Reject documents for which `validator` returns `Err`.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Make counts and reads of `collection` fail.
    pub fn with_failing_collection(mut self, collection: &str) -> Self {
        self.failing_collections.insert(collection.to_string());
        self
    }

    /// Make `list_collections` fail.
    pub fn with_failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Current documents of a collection, in storage order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let state = self.state.read().await;
        state.get(collection).map(|c| c.documents.clone()).unwrap_or_default()
    }

    /// Index names of a collection, including `_id_`.
    pub async fn index_names(&self, collection: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .get(collection)
            .map(|c| {
                c.indexes
                    .iter()
                    .filter_map(|i| i.get_str("name").ok().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw index specs of a collection.
    pub async fn index_specs(&self, collection: &str) -> Vec<Document> {
        let state = self.state.read().await;
        state.get(collection).map(|c| c.indexes.clone()).unwrap_or_default()
    }

    /// Every recorded call, in order.
    pub async fn operations(&self) -> Vec<StoreOp> {
        self.operations.read().await.clone()
    }

    /// Recorded calls that can modify the store.
    pub async fn write_operations(&self) -> Vec<StoreOp> {
        self.operations.read().await.iter().filter(|op| op.is_write()).cloned().collect()
    }

    /// Recorded calls touching one collection.
    pub async fn operations_on(&self, collection: &str) -> Vec<StoreOp> {
        self.operations
            .read()
            .await
            .iter()
            .filter(|op| op.collection() == Some(collection))
            .cloned()
            .collect()
    }

    /// How many times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Clear the recorded calls (data is kept).
    pub async fn reset_operations(&self) {
        self.operations.write().await.clear();
    }

    async fn record(&self, op: StoreOp) {
        self.operations.write().await.push(op);
    }

    fn check_readable(&self, collection: &str) -> StoreResult<()> {
        if self.failing_collections.contains(collection) {
            return Err(StoreError::Backend(format!(
                "simulated read failure on {}.{collection}",
                self.name
            )));
        }
        Ok(())
    }

    fn validate(&self, document: &Document) -> StoreResult<()> {
        match &self.validator {
            Some(validator) => validator(document).map_err(StoreError::Rejected),
            None => Ok(()),
        }
    }

    async fn matching(&self, collection: &str, filter: &Document) -> Vec<Document> {
        let state = self.state.read().await;
        state
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| matches_filter(d, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert with `_id` and unique index enforcement. Returns the `_id`.
    fn insert_into(&self, collection: &mut MemoryCollection, mut document: Document) -> StoreResult<Bson> {
        self.validate(&document)?;
        let id = ensure_id(&mut document);
        if collection.position_by_id(&id).is_some() {
            return Err(StoreError::DuplicateKey(format!(
                "E11000 duplicate key error, _id: {id}"
            )));
        }
        if let Some(message) = collection.unique_violation(&document, None) {
            return Err(StoreError::DuplicateKey(message));
        }
        collection.documents.push(document);
        Ok(id)
    }

    fn upsert_into(&self, collection: &mut MemoryCollection, id_field: &str, document: Document) -> StoreResult<()> {
        self.validate(&document)?;
        let key = document
            .get(id_field)
            .cloned()
            .ok_or_else(|| StoreError::Rejected(format!("document has no {id_field} field")))?;
        let existing = collection
            .documents
            .iter()
            .position(|d| d.get(id_field).map_or(false, |v| compare_values(v, &key) == Some(std::cmp::Ordering::Equal) || *v == key));

        match existing {
            Some(pos) => {
                let mut replacement = document;
                // A replacement keeps the stored _id
                if let Some(id) = collection.documents[pos].get("_id").cloned() {
                    if replacement.get("_id").map_or(false, |new_id| *new_id != id) {
                        return Err(StoreError::Rejected(
                            "replacement would modify the immutable field '_id'".to_string(),
                        ));
                    }
                    replacement.insert("_id", id);
                }
                if let Some(message) = collection.unique_violation(&replacement, Some(pos)) {
                    return Err(StoreError::DuplicateKey(message));
                }
                collection.documents[pos] = reorder_id_first(replacement);
                Ok(())
            }
            None => self.insert_into(collection, document).map(|_| ()),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("name", &self.name).finish()
    }
}

/// Give a document an `_id` if it has none, returning the id.
fn ensure_id(document: &mut Document) -> Bson {
    if let Some(id) = document.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut with_id = Document::new();
    with_id.insert("_id", id.clone());
    with_id.extend(std::mem::take(document));
    *document = with_id;
    id
}

fn reorder_id_first(mut document: Document) -> Document {
    match document.remove("_id") {
        Some(id) => {
            let mut ordered = doc! { "_id": id };
            ordered.extend(document);
            ordered
        }
        None => document,
    }
}

impl DocumentStore for MemoryStore {
    fn endpoint(&self) -> &str {
        &self.name
    }

    fn list_collections(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.record(StoreOp::ListCollections).await;
            if self.fail_listing {
                return Err(StoreError::Backend(format!(
                    "simulated listCollections failure on {}",
                    self.name
                )));
            }
            let state = self.state.read().await;
            Ok(state.collections.iter().map(|c| c.name.clone()).collect())
        })
    }

    fn count_documents(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::Count { collection: collection.clone() }).await;
            self.check_readable(&collection)?;
            Ok(self.matching(&collection, &filter).await.len() as u64)
        })
    }

    fn find(&self, collection: &str, filter: Document, _batch_size: u32) -> BoxFuture<'_, DocumentStream> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::Find { collection: collection.clone() }).await;
            self.check_readable(&collection)?;
            let documents = self.matching(&collection, &filter).await;
            let stream: DocumentStream = Box::pin(futures::stream::iter(documents.into_iter().map(Ok)));
            Ok(stream)
        })
    }

    fn find_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, Option<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::FindOne { collection: collection.clone() }).await;
            self.check_readable(&collection)?;
            Ok(self.matching(&collection, &filter).await.into_iter().next())
        })
    }

    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Bson> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::InsertOne { collection: collection.clone() }).await;
            let mut state = self.state.write().await;
            let target = state.get_or_create(&collection);
            self.insert_into(target, document)
        })
    }

    fn delete_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::DeleteOne { collection: collection.clone() }).await;
            let mut state = self.state.write().await;
            let Some(pos) = state.collections.iter().position(|c| c.name == collection) else {
                return Ok(0);
            };
            let target = &mut state.collections[pos];
            match target.documents.iter().position(|d| matches_filter(d, &filter)) {
                Some(doc_pos) => {
                    target.documents.remove(doc_pos);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    fn delete_all(&self, collection: &str) -> BoxFuture<'_, u64> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::DeleteAll { collection: collection.clone() }).await;
            let mut state = self.state.write().await;
            let Some(pos) = state.collections.iter().position(|c| c.name == collection) else {
                return Ok(0);
            };
            let removed = std::mem::take(&mut state.collections[pos].documents);
            Ok(removed.len() as u64)
        })
    }

    fn insert_many_unordered(&self, collection: &str, documents: Vec<Document>) -> BoxFuture<'_, WriteOutcome> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::InsertMany {
                collection: collection.clone(),
                documents: documents.len(),
            })
            .await;
            let mut state = self.state.write().await;
            let target = state.get_or_create(&collection);
            let mut outcome = WriteOutcome {
                attempted: documents.len() as u64,
                ..Default::default()
            };
            for document in documents {
                match self.insert_into(target, document) {
                    Ok(_) => outcome.written += 1,
                    Err(e) => outcome.record_error(e.to_string()),
                }
            }
            Ok(outcome)
        })
    }

    fn upsert_many_unordered(
        &self,
        collection: &str,
        id_field: &str,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, WriteOutcome> {
        let collection = collection.to_string();
        let id_field = id_field.to_string();
        Box::pin(async move {
            self.record(StoreOp::UpsertMany {
                collection: collection.clone(),
                documents: documents.len(),
            })
            .await;
            let mut state = self.state.write().await;
            let target = state.get_or_create(&collection);
            let mut outcome = WriteOutcome {
                attempted: documents.len() as u64,
                ..Default::default()
            };
            for document in documents {
                match self.upsert_into(target, &id_field, document) {
                    Ok(()) => outcome.written += 1,
                    Err(e) => outcome.record_error(e.to_string()),
                }
            }
            Ok(outcome)
        })
    }

    fn list_indexes(&self, collection: &str) -> BoxFuture<'_, Vec<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.record(StoreOp::ListIndexes { collection: collection.clone() }).await;
            let state = self.state.read().await;
            match state.get(&collection) {
                Some(c) => Ok(c.indexes.clone()),
                None => Err(StoreError::NamespaceNotFound(format!("{}.{collection}", self.name))),
            }
        })
    }

    fn create_index(&self, collection: &str, spec: Document) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        Box::pin(async move {
            let name = spec.get_str("name").unwrap_or_default().to_string();
            self.record(StoreOp::CreateIndex {
                collection: collection.clone(),
                name: name.clone(),
            })
            .await;

            let keys = spec
                .get_document("key")
                .map_err(|_| StoreError::Rejected("index spec has no key document".to_string()))?
                .clone();
            if name.is_empty() {
                return Err(StoreError::Rejected("index spec has no name".to_string()));
            }

            let mut state = self.state.write().await;
            let target = state.get_or_create(&collection);
            for existing in &target.indexes {
                let same_name = existing.get_str("name").ok() == Some(name.as_str());
                let same_keys = existing.get_document("key").ok() == Some(&keys);
                match (same_name, same_keys) {
                    // Identical definition: server treats as a no-op
                    (true, true) => return Ok(()),
                    (true, false) => {
                        return Err(StoreError::Rejected(format!(
                            "An existing index has the same name as the requested index: {name}"
                        )))
                    }
                    (false, true) => {
                        return Err(StoreError::Rejected(format!(
                            "Index already exists with a different name: {}",
                            existing.get_str("name").unwrap_or_default()
                        )))
                    }
                    (false, false) => {}
                }
            }
            target.indexes.push(spec);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
