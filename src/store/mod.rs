// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration traits.
//!
//! Defines the interface the engine needs from a source or target endpoint.
//! The trait is object safe so the engine can hold `Arc<dyn DocumentStore>`
//! for both sides regardless of backend.
//!
//! Two implementations ship with the crate:
//! - [`MongoStore`](crate::mongo::MongoStore) for real MongoDB endpoints
//! - [`MemoryStore`] for tests and local experiments
//!
//! # Example
//!
//! ```rust,no_run
//! use collection_replicator::store::{BoxFuture, DocumentStore, DocumentStream, StoreResult, WriteOutcome};
//! use bson::{Bson, Document};
//!
//! struct ReadOnlyArchive;
//!
//! impl DocumentStore for ReadOnlyArchive {
//!     fn endpoint(&self) -> &str { "archive" }
//!     fn list_collections(&self) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async { Ok(vec!["events".to_string()]) })
//!     }
//!     fn count_documents(&self, _c: &str, _f: Document) -> BoxFuture<'_, u64> {
//!         Box::pin(async { Ok(0) })
//!     }
//!     fn find(&self, _c: &str, _f: Document, _b: u32) -> BoxFuture<'_, DocumentStream> {
//!         let empty = futures::stream::empty::<StoreResult<Document>>();
//!         Box::pin(async move { Ok(Box::pin(empty) as DocumentStream) })
//!     }
//!     fn find_one(&self, _c: &str, _f: Document) -> BoxFuture<'_, Option<Document>> {
//!         Box::pin(async { Ok(None) })
//!     }
//!     // ... writes return StoreError::Rejected
//! #   fn insert_one(&self, _c: &str, _d: Document) -> BoxFuture<'_, Bson> { unimplemented!() }
//! #   fn delete_one(&self, _c: &str, _f: Document) -> BoxFuture<'_, u64> { unimplemented!() }
//! #   fn delete_all(&self, _c: &str) -> BoxFuture<'_, u64> { unimplemented!() }
//! #   fn insert_many_unordered(&self, _c: &str, _d: Vec<Document>) -> BoxFuture<'_, WriteOutcome> { unimplemented!() }
//! #   fn upsert_many_unordered(&self, _c: &str, _i: &str, _d: Vec<Document>) -> BoxFuture<'_, WriteOutcome> { unimplemented!() }
//! #   fn list_indexes(&self, _c: &str) -> BoxFuture<'_, Vec<Document>> { unimplemented!() }
//! #   fn create_index(&self, _c: &str, _s: Document) -> BoxFuture<'_, ()> { unimplemented!() }
//! }
//! ```

mod filter;
mod memory;

pub use filter::{compare_values, matches_filter};
pub use memory::{MemoryStore, StoreOp};

use crate::error::StoreError;
use bson::{Bson, Document};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// A single-pass stream of documents from a source cursor.
pub type DocumentStream = Pin<Box<dyn Stream<Item = StoreResult<Document>> + Send>>;

/// Outcome of an unordered multi-document write.
///
/// Individual document failures are counted here instead of failing the call;
/// an `Err` from the store means the whole call failed (network, auth).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents handed to the store.
    pub attempted: u64,
    /// Documents inserted, replaced or upserted.
    pub written: u64,
    /// Documents the store refused.
    pub errors: u64,
    /// First per-document error message, for logs.
    pub first_error: Option<String>,
}

impl WriteOutcome {
    /// Outcome where every attempted document was written.
    pub fn all_written(attempted: u64) -> Self {
        Self {
            attempted,
            written: attempted,
            ..Default::default()
        }
    }

    /// Record one refused document.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message.into());
        }
    }

    /// Check if all documents were written.
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

/// Trait defining what the engine needs from a document store endpoint.
///
/// Methods that take `&str` arguments copy them before boxing the future so
/// the returned future only borrows `self`.
pub trait DocumentStore: Send + Sync + 'static {
    /// Human-readable endpoint label for logs ("source", host name, ...).
    fn endpoint(&self) -> &str;

    /// Collection names in the store's natural listing order.
    fn list_collections(&self) -> BoxFuture<'_, Vec<String>>;

    /// Count documents matching `filter`.
    fn count_documents(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64>;

    /// Open a cursor over documents matching `filter`.
    ///
    /// `batch_size` is a hint for how many documents the backend fetches per
    /// round trip.
    fn find(&self, collection: &str, filter: Document, batch_size: u32)
        -> BoxFuture<'_, DocumentStream>;

    /// Fetch one document matching `filter`.
    fn find_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, Option<Document>>;

    /// Insert one document, returning its (possibly generated) `_id`.
    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Bson>;

    /// Delete at most one document matching `filter`. Returns the deleted count.
    fn delete_one(&self, collection: &str, filter: Document) -> BoxFuture<'_, u64>;

    /// Delete every document in the collection. Returns the deleted count.
    fn delete_all(&self, collection: &str) -> BoxFuture<'_, u64>;

    /// Insert documents without stopping at the first failure.
    fn insert_many_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, WriteOutcome>;

    /// Replace-or-insert each document matched on `id_field`, without
    /// stopping at the first failure.
    fn upsert_many_unordered(
        &self,
        collection: &str,
        id_field: &str,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, WriteOutcome>;

    /// Raw index specifications of a collection (as returned by `listIndexes`).
    fn list_indexes(&self, collection: &str) -> BoxFuture<'_, Vec<Document>>;

    /// Create one index from a raw specification (`key`, `name`, options).
    fn create_index(&self, collection: &str, spec: Document) -> BoxFuture<'_, ()>;

    /// Release the endpoint connection.
    ///
    /// Default implementation does nothing.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_outcome_all_written() {
        let outcome = WriteOutcome::all_written(5);
        assert_eq!(outcome.attempted, 5);
        assert_eq!(outcome.written, 5);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_write_outcome_keeps_first_error() {
        let mut outcome = WriteOutcome {
            attempted: 3,
            written: 1,
            ..Default::default()
        };
        outcome.record_error("duplicate key: 1");
        outcome.record_error("duplicate key: 2");

        assert_eq!(outcome.errors, 2);
        assert_eq!(outcome.first_error.as_deref(), Some("duplicate key: 1"));
        assert!(!outcome.is_success());
    }
}
