// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write strategies: how a batch lands on the target.
//!
//! | Strategy | `prepare` | `apply_batch` |
//! |----------|-----------|---------------|
//! | [`FullReplace`] | delete every target document | unordered insert-many |
//! | [`IncrementalUpsert`] | nothing | unordered replace-with-upsert on the id field |
//!
//! Both strategies absorb per-document failures: they are counted in
//! [`BatchOutcome::errors`] and logged at debug, and the batch still counts as
//! attempted. Only whole-call failures (network, auth) are returned as `Err`.
//!
//! The strategy is chosen once per run by [`strategy_for`].

use crate::batch::DocumentBatch;
use crate::config::JobConfig;
use crate::error::{ReplicationError, Result};
use crate::store::{DocumentStore, WriteOutcome};
use crate::metrics;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::debug;

/// Boxed engine-level future (errors are [`ReplicationError`]).
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Result of committing one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Documents in the batch.
    pub attempted: u64,
    /// Documents the target accepted.
    pub written: u64,
    /// Documents the target refused.
    pub errors: u64,
}

impl BatchOutcome {
    /// Check if every document was accepted.
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

impl From<&WriteOutcome> for BatchOutcome {
    fn from(outcome: &WriteOutcome) -> Self {
        Self {
            attempted: outcome.attempted,
            written: outcome.written,
            errors: outcome.errors,
        }
    }
}

/// Which strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    FullReplace,
    IncrementalUpsert,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullReplace => "full-replace",
            Self::IncrementalUpsert => "incremental-upsert",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies batches to a target collection.
pub trait WriteStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Run once per collection before the first batch. Returns documents removed.
    fn prepare<'a>(&'a self, target: &'a dyn DocumentStore, collection: &str) -> EngineFuture<'a, u64>;

    /// Commit one batch.
    fn apply_batch<'a>(
        &'a self,
        target: &'a dyn DocumentStore,
        collection: &str,
        batch: DocumentBatch,
    ) -> EngineFuture<'a, BatchOutcome>;
}

/// Clears the target collection, then inserts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullReplace;

impl WriteStrategy for FullReplace {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FullReplace
    }

    fn prepare<'a>(&'a self, target: &'a dyn DocumentStore, collection: &str) -> EngineFuture<'a, u64> {
        let collection = collection.to_string();
        Box::pin(async move {
            let removed = target
                .delete_all(&collection)
                .await
                .map_err(|e| ReplicationError::store("delete_many", e))?;
            metrics::record_documents_cleared(&collection, removed);
            debug!(collection = %collection, removed, "Target collection cleared");
            Ok(removed)
        })
    }

    fn apply_batch<'a>(
        &'a self,
        target: &'a dyn DocumentStore,
        collection: &str,
        batch: DocumentBatch,
    ) -> EngineFuture<'a, BatchOutcome> {
        let collection = collection.to_string();
        Box::pin(async move {
            let start = Instant::now();
            let outcome = target
                .insert_many_unordered(&collection, batch.into_documents())
                .await
                .map_err(|e| ReplicationError::store("insert_many", e))?;
            finish(&collection, self.kind(), &outcome, start)
        })
    }
}

/// Replaces or inserts each document matched on `id_field`.
#[derive(Debug, Clone)]
pub struct IncrementalUpsert {
    pub id_field: String,
}

impl IncrementalUpsert {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self { id_field: id_field.into() }
    }
}

impl WriteStrategy for IncrementalUpsert {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IncrementalUpsert
    }

    fn prepare<'a>(&'a self, _target: &'a dyn DocumentStore, _collection: &str) -> EngineFuture<'a, u64> {
        Box::pin(async { Ok(0) })
    }

    fn apply_batch<'a>(
        &'a self,
        target: &'a dyn DocumentStore,
        collection: &str,
        batch: DocumentBatch,
    ) -> EngineFuture<'a, BatchOutcome> {
        let collection = collection.to_string();
        Box::pin(async move {
            let start = Instant::now();
            let outcome = target
                .upsert_many_unordered(&collection, &self.id_field, batch.into_documents())
                .await
                .map_err(|e| ReplicationError::store("upsert_many", e))?;
            finish(&collection, self.kind(), &outcome, start)
        })
    }
}

fn finish(collection: &str, kind: StrategyKind, outcome: &WriteOutcome, start: Instant) -> Result<BatchOutcome> {
    let elapsed = start.elapsed();
    metrics::record_batch_flush(collection, kind.as_str(), outcome.attempted, outcome.errors, elapsed);

    if !outcome.is_success() {
        debug!(
            collection = %collection,
            strategy = %kind,
            errors = outcome.errors,
            first_error = outcome.first_error.as_deref().unwrap_or(""),
            "Per-document write errors absorbed"
        );
    }
    debug!(
        collection = %collection,
        strategy = %kind,
        attempted = outcome.attempted,
        written = outcome.written,
        elapsed_ms = elapsed.as_millis() as u64,
        "Batch committed"
    );
    Ok(BatchOutcome::from(outcome))
}

/// Pick the strategy for a run.
pub fn strategy_for(config: &JobConfig) -> Box<dyn WriteStrategy> {
    if config.is_incremental() {
        Box::new(IncrementalUpsert::new(config.id_field.clone()))
    } else {
        Box::new(FullReplace)
    }
}
