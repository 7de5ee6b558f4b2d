// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index replication.
//!
//! Copies secondary index definitions from a source collection (or an index
//! artifact) onto the target. The implicit `_id_` index is never recreated.
//! Index creation is best effort: a conflict or rejection is logged, counted
//! and skipped, and never fails the collection.

use crate::metrics;
use crate::store::DocumentStore;
use bson::{doc, Bson, Document};
use serde::Serialize;
use tracing::{debug, warn};

/// Keys stripped from listed specs before re-creation.
const SERVER_ONLY_KEYS: [&str; 2] = ["v", "ns"];

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    /// Ordered key pattern, e.g. `{ "email": 1, "createdAt": -1 }`.
    pub keys: Document,
    /// Everything else (`unique`, `sparse`, `expireAfterSeconds`, ...).
    pub options: Document,
}

impl IndexDefinition {
    /// Parse a raw `listIndexes` entry.
    ///
    /// Returns `None` for the `_id` index and for malformed entries.
    pub fn from_spec(spec: &Document) -> Option<Self> {
        let name = spec.get_str("name").ok()?.to_string();
        let keys = spec.get_document("key").ok()?.clone();
        if name == "_id_" || is_id_only(&keys) {
            return None;
        }

        let options: Document = spec
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "name" | "key") && !SERVER_ONLY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self { name, keys, options })
    }

    /// Spec suitable for `createIndexes`.
    pub fn to_spec(&self) -> Document {
        let mut spec = doc! { "key": self.keys.clone(), "name": self.name.clone() };
        spec.extend(self.options.clone());
        spec
    }
}

fn is_id_only(keys: &Document) -> bool {
    if keys.len() != 1 {
        return false;
    }
    match keys.get("_id") {
        Some(Bson::Int32(1)) | Some(Bson::Int64(1)) => true,
        Some(Bson::Double(v)) => *v == 1.0,
        _ => false,
    }
}

/// Parse many raw specs, dropping the `_id` index.
pub fn definitions_from_specs(specs: &[Document]) -> Vec<IndexDefinition> {
    specs.iter().filter_map(IndexDefinition::from_spec).collect()
}

/// Index replication counts for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Indexes created (or already identical on the target).
    pub created: usize,
    /// Indexes the target refused.
    pub failed: usize,
}

impl IndexReport {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.failed == 0
    }
}

/// Copy index definitions of `collection` from `source` to `target`.
///
/// A failure to list source indexes is logged and yields an empty report.
pub async fn replicate_indexes(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    collection: &str,
) -> IndexReport {
    let specs = match source.list_indexes(collection).await {
        Ok(specs) => specs,
        Err(e) => {
            warn!(collection = %collection, error = %e, "Could not list source indexes");
            return IndexReport::default();
        }
    };
    apply_index_definitions(target, collection, &definitions_from_specs(&specs)).await
}

/// Create each definition on `target`, best effort.
pub async fn apply_index_definitions(
    target: &dyn DocumentStore,
    collection: &str,
    definitions: &[IndexDefinition],
) -> IndexReport {
    let mut report = IndexReport::default();

    for definition in definitions {
        match target.create_index(collection, definition.to_spec()).await {
            Ok(()) => {
                report.created += 1;
                debug!(collection = %collection, index = %definition.name, "Index created");
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    collection = %collection,
                    index = %definition.name,
                    error = %e,
                    "Index creation failed, skipping"
                );
            }
        }
    }

    metrics::record_index_replication(collection, report.created, report.failed);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_from_spec_strips_server_keys() {
        let spec = doc! {
            "v": 2,
            "key": { "email": 1 },
            "name": "email_1",
            "ns": "shop.users",
            "unique": true,
        };
        let def = IndexDefinition::from_spec(&spec).unwrap();
        assert_eq!(def.name, "email_1");
        assert_eq!(def.keys, doc! { "email": 1 });
        assert_eq!(def.options, doc! { "unique": true });
        assert_eq!(def.to_spec(), doc! { "key": { "email": 1 }, "name": "email_1", "unique": true });
    }

    #[test]
    fn test_id_index_dropped() {
        assert!(IndexDefinition::from_spec(&doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }).is_none());
        assert!(IndexDefinition::from_spec(&doc! { "key": { "_id": 1 }, "name": "renamed" }).is_none());
        // Compound keys starting with _id are real secondary indexes
        assert!(IndexDefinition::from_spec(&doc! { "key": { "_id": 1, "a": 1 }, "name": "id_a" }).is_some());
    }

    #[test]
    fn test_key_order_preserved() {
        let spec = doc! { "key": { "b": 1, "a": -1 }, "name": "b_1_a_-1" };
        let def = IndexDefinition::from_spec(&spec).unwrap();
        let keys: Vec<&String> = def.keys.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_replicate_skips_id_and_copies_secondary() {
        let source = MemoryStore::new("source")
            .with_collection("users", vec![])
            .with_index("users", doc! { "v": 2, "key": { "email": 1 }, "name": "email_1", "unique": true })
            .with_index("users", doc! { "v": 2, "key": { "createdAt": -1 }, "name": "createdAt_-1", "expireAfterSeconds": 3600 });
        let target = MemoryStore::new("target");

        let report = replicate_indexes(&source, &target, "users").await;
        assert_eq!(report, IndexReport { created: 2, failed: 0 });
        assert_eq!(target.index_names("users").await, vec!["_id_", "email_1", "createdAt_-1"]);

        let specs = target.index_specs("users").await;
        assert_eq!(specs[2].get_i32("expireAfterSeconds").unwrap(), 3600);
    }

    #[tokio::test]
    async fn test_conflict_does_not_abort() {
        let source = MemoryStore::new("source")
            .with_collection("c", vec![])
            .with_index("c", doc! { "key": { "a": 1 }, "name": "by_a" })
            .with_index("c", doc! { "key": { "b": 1 }, "name": "by_b" });
        let target = MemoryStore::new("target")
            .with_collection("c", vec![])
            .with_index("c", doc! { "key": { "z": 1 }, "name": "by_a" });

        let report = replicate_indexes(&source, &target, "c").await;
        assert_eq!(report, IndexReport { created: 1, failed: 1 });
        assert!(target.index_names("c").await.contains(&"by_b".to_string()));
    }

    #[tokio::test]
    async fn test_listing_failure_yields_empty_report() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        let report = replicate_indexes(&source, &target, "missing").await;
        assert!(report.is_empty());
        assert!(target.write_operations().await.is_empty());
    }
}
