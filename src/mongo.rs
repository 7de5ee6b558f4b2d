// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB endpoint backed by the official driver.
//!
//! # Operation Mapping
//!
//! | Store call | Driver call |
//! |------------|-------------|
//! | `insert_many_unordered` | `insertMany` with `ordered: false` |
//! | `upsert_many_unordered` | one `replaceOne { upsert: true }` per document, pipelined |
//! | `list_indexes` | `listIndexes` command (raw specs, every option kept) |
//! | `create_index` | `createIndexes` command |
//! | `close` | `Client::shutdown` |
//!
//! Per-document write failures (duplicate key, validator rejection) are
//! counted in the [`WriteOutcome`]; anything else fails the whole call.

use crate::config::{EndpointConfig, JobConfig};
use crate::coordinator::Endpoints;
use crate::error::{ReplicationError, Result, StoreError};
use crate::metrics;
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::store::{BoxFuture, DocumentStore, DocumentStream, WriteOutcome};
use bson::{doc, Bson, Document};
use futures::StreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, FindOptions, InsertManyOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Concurrent `replaceOne` calls per upsert batch.
const UPSERT_CONCURRENCY: usize = 16;

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        let code = match e.kind.as_ref() {
            ErrorKind::Command(command) => Some(command.code),
            ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
            _ => None,
        };
        match code {
            Some(DUPLICATE_KEY) => StoreError::DuplicateKey(e.to_string()),
            Some(NAMESPACE_NOT_FOUND) => StoreError::NamespaceNotFound(e.to_string()),
            Some(DOCUMENT_VALIDATION_FAILURE) => StoreError::Rejected(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

/// A database on a MongoDB deployment.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
    label: String,
}

impl MongoStore {
    /// Connect and ping once.
    pub async fn connect(label: &str, endpoint: &EndpointConfig) -> Result<Self> {
        let connection_error = |message: String| ReplicationError::Connection {
            endpoint: label.to_string(),
            message,
        };

        let mut options = ClientOptions::parse(&endpoint.uri)
            .await
            .map_err(|e| connection_error(format!("invalid uri {}: {e}", endpoint.redacted_uri())))?;
        let connect_timeout = endpoint.connect_timeout_duration();
        options.connect_timeout = Some(connect_timeout);
        options.server_selection_timeout = Some(connect_timeout);
        options.app_name = Some(
            endpoint
                .app_name
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
        );

        let client = Client::with_options(options).map_err(|e| connection_error(e.to_string()))?;
        let db = client.database(&endpoint.database);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| connection_error(format!("ping failed: {e}")))?;

        info!(
            endpoint = %label,
            uri = %endpoint.redacted_uri(),
            database = %endpoint.database,
            "Connected"
        );
        Ok(Self {
            client,
            db,
            label: label.to_string(),
        })
    }

    /// [`connect`](Self::connect) with exponential backoff.
    pub async fn connect_with_retry(label: &str, endpoint: &EndpointConfig, retry: &RetryConfig) -> Result<Self> {
        retry_with_backoff(label, retry, || async move {
            let result = Self::connect(label, endpoint).await;
            metrics::record_connection_attempt(label, result.is_ok());
            result
        })
        .await
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

/// Connect the endpoints a job needs.
///
/// If the target cannot be reached the already-open source is closed before
/// the error is returned.
pub async fn connect_endpoints(config: &JobConfig, retry: &RetryConfig) -> Result<Endpoints> {
    config.validate_endpoints()?;

    let source: Option<Arc<dyn DocumentStore>> = match (&config.source, config.mode.reads_source()) {
        (Some(endpoint), true) => {
            let store = MongoStore::connect_with_retry("source", endpoint, retry).await?;
            Some(Arc::new(store) as Arc<dyn DocumentStore>)
        }
        _ => None,
    };

    let target: Option<Arc<dyn DocumentStore>> = match (&config.target, config.mode.writes_target()) {
        (Some(endpoint), true) => match MongoStore::connect_with_retry("target", endpoint, retry).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn DocumentStore>),
            Err(e) => {
                if let Some(source) = &source {
                    if let Err(close_err) = source.close().await {
                        warn!(error = %close_err, "Failed to close source after target connection error");
                    }
                }
                return Err(e);
            }
        },
        _ => None,
    };

    Ok(Endpoints { source, target })
}

fn is_document_write_error(e: &mongodb::error::Error) -> bool {
    matches!(e.kind.as_ref(), ErrorKind::Write(WriteFailure::WriteError(_)))
}

impl DocumentStore for MongoStore {
    fn endpoint(&self) -> &str {
        &self.label
    }

    fn list_collections(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.db.list_collection_names(None).await?) })
    }

    fn count_documents(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64> {
        let coll = self.collection(collection);
        Box::pin(async move { Ok(coll.count_documents(filter, None).await?) })
    }

    fn find(&self, collection: &str, filter: Document, batch_size: u32) -> BoxFuture<'_, DocumentStream> {
        let coll = self.collection(collection);
        Box::pin(async move {
            let options = FindOptions::builder().batch_size(batch_size).build();
            let cursor = coll.find(filter, options).await?;
            let stream: DocumentStream = Box::pin(cursor.map(|item| item.map_err(StoreError::from)));
            Ok(stream)
        })
    }

    fn find_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, Option<Document>> {
        let coll = self.collection(collection);
        Box::pin(async move { Ok(coll.find_one(filter, None).await?) })
    }

    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Bson> {
        let coll = self.collection(collection);
        Box::pin(async move { Ok(coll.insert_one(document, None).await?.inserted_id) })
    }

    fn delete_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64> {
        let coll = self.collection(collection);
        Box::pin(async move { Ok(coll.delete_one(filter, None).await?.deleted_count) })
    }

    fn delete_all(&self, collection: &str) -> BoxFuture<'_, u64> {
        let coll = self.collection(collection);
        Box::pin(async move { Ok(coll.delete_many(doc! {}, None).await?.deleted_count) })
    }

    fn insert_many_unordered(&self, collection: &str, documents: Vec<Document>) -> BoxFuture<'_, WriteOutcome> {
        let coll = self.collection(collection);
        Box::pin(async move {
            let attempted = documents.len() as u64;
            if documents.is_empty() {
                return Ok(WriteOutcome::default());
            }

            let options = InsertManyOptions::builder().ordered(false).build();
            let err = match coll.insert_many(documents, options).await {
                Ok(_) => return Ok(WriteOutcome::all_written(attempted)),
                Err(e) => e,
            };

            let partial = match err.kind.as_ref() {
                ErrorKind::BulkWrite(failure) if failure.write_concern_error.is_none() => {
                    let mut outcome = WriteOutcome {
                        attempted,
                        ..Default::default()
                    };
                    for write_error in failure.write_errors.as_deref().unwrap_or_default() {
                        outcome.record_error(format!("E{}: {}", write_error.code, write_error.message));
                    }
                    outcome.written = attempted.saturating_sub(outcome.errors);
                    Some(outcome)
                }
                _ => None,
            };
            partial.ok_or_else(|| StoreError::from(err))
        })
    }

    fn upsert_many_unordered(
        &self,
        collection: &str,
        id_field: &str,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, WriteOutcome> {
        let coll = self.collection(collection);
        let id_field = id_field.to_string();
        Box::pin(async move {
            let mut outcome = WriteOutcome {
                attempted: documents.len() as u64,
                ..Default::default()
            };

            let mut keyed = Vec::with_capacity(documents.len());
            for document in documents {
                match document.get(&id_field).cloned() {
                    Some(key) => keyed.push((key, document)),
                    None => outcome.record_error(format!("document has no {id_field} field")),
                }
            }

            let results: Vec<std::result::Result<(), mongodb::error::Error>> = futures::stream::iter(keyed)
                .map(|(key, document)| {
                    let coll = coll.clone();
                    let mut filter = Document::new();
                    filter.insert(id_field.as_str(), key);
                    async move {
                        let options = ReplaceOptions::builder().upsert(true).build();
                        coll.replace_one(filter, document, options).await.map(|_| ())
                    }
                })
                .buffer_unordered(UPSERT_CONCURRENCY)
                .collect()
                .await;

            for result in results {
                match result {
                    Ok(()) => outcome.written += 1,
                    Err(e) if is_document_write_error(&e) => outcome.record_error(e.to_string()),
                    Err(e) => return Err(StoreError::from(e)),
                }
            }
            Ok(outcome)
        })
    }

    fn list_indexes(&self, collection: &str) -> BoxFuture<'_, Vec<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let reply = self.db.run_command(doc! { "listIndexes": collection.as_str() }, None).await?;
            let cursor = reply
                .get_document("cursor")
                .map_err(|_| StoreError::Backend("listIndexes reply has no cursor".to_string()))?;
            let specs: Vec<Document> = cursor
                .get_array("firstBatch")
                .map(|batch| batch.iter().filter_map(|b| b.as_document().cloned()).collect())
                .unwrap_or_default();
            if cursor.get_i64("id").unwrap_or(0) != 0 {
                warn!(collection = %collection, "listIndexes returned more than one batch, extra indexes ignored");
            }
            Ok(specs)
        })
    }

    fn create_index(&self, collection: &str, spec: Document) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.db
                .run_command(doc! { "createIndexes": collection.as_str(), "indexes": [spec] }, None)
                .await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        let client = self.client.clone();
        let label = self.label.clone();
        Box::pin(async move {
            client.shutdown().await;
            debug!(endpoint = %label, "Connection closed");
            Ok(())
        })
    }
}

// Live-server tests are in tests/mongo_integration.rs
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_uri() {
        let endpoint = EndpointConfig::new("not-a-mongo-uri", "db");
        let err = match MongoStore::connect("source", &endpoint).await {
            Ok(_) => panic!("expected a connection error"),
            Err(e) => e,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("source"));
    }
}
