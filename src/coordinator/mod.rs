// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The orchestrator that ties together:
//! - Query building via [`crate::query::build_predicate`]
//! - Schema probing via [`crate::probe`]
//! - Batch streaming via [`crate::batch::BatchStreamer`]
//! - Write strategies via [`crate::strategy::WriteStrategy`]
//! - Index replication via [`crate::indexes`]
//! - Snapshot artifacts via [`crate::artifact::ArtifactStore`]
//!
//! # Architecture
//!
//! ```text
//! run()
//!  ├── select collections        (source listing / artifact directory)
//!  ├── for each collection ──────────────── error boundary ───────────┐
//!  │    ├── count(predicate)      total == 0 → empty / no-new-docs    │
//!  │    ├── schema probe          rejected   → schema-validation-failed
//!  │    ├── dry run               → dry-run                           │
//!  │    ├── transfer              live.rs / snapshot.rs               │
//!  │    └── indexes               best effort                         │
//!  │                              any other Err → failed ─────────────┘
//!  └── close endpoints (once, always)
//! ```
//!
//! Collections are processed one after another. A failure inside one
//! collection is recorded in its [`CollectionResult`] and the loop moves on;
//! only errors outside the per-collection boundary abort the run.

mod live;
mod snapshot;
mod types;

pub use types::{CollectionResult, CollectionStatus, EngineState, RunSummary};

use crate::artifact::ArtifactStore;
use crate::config::{JobConfig, JobMode};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::progress::{NoOpProgress, ProgressReporter, ProgressSession};
use crate::query::build_predicate;
use crate::store::DocumentStore;
use crate::strategy::{strategy_for, StrategyKind, WriteStrategy};
use bson::Document;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// The two endpoint handles a run works against.
///
/// Export runs need no target, import runs no source.
#[derive(Clone, Default)]
pub struct Endpoints {
    pub source: Option<Arc<dyn DocumentStore>>,
    pub target: Option<Arc<dyn DocumentStore>>,
}

impl Endpoints {
    /// Source → target.
    pub fn live(source: Arc<dyn DocumentStore>, target: Arc<dyn DocumentStore>) -> Self {
        Self {
            source: Some(source),
            target: Some(target),
        }
    }

    /// Source only.
    pub fn export(source: Arc<dyn DocumentStore>) -> Self {
        Self {
            source: Some(source),
            target: None,
        }
    }

    /// Target only.
    pub fn import(target: Arc<dyn DocumentStore>) -> Self {
        Self {
            source: None,
            target: Some(target),
        }
    }

    /// Close each distinct endpoint once. Errors are logged, not returned.
    pub async fn close(&self) {
        if let Some(source) = &self.source {
            close_endpoint(source.as_ref()).await;
        }
        if let Some(target) = &self.target {
            let shared = self.source.as_ref().is_some_and(|s| Arc::ptr_eq(s, target));
            if !shared {
                close_endpoint(target.as_ref()).await;
            }
        }
    }
}

async fn close_endpoint(store: &dyn DocumentStore) {
    if let Err(e) = store.close().await {
        warn!(endpoint = %store.endpoint(), error = %e, "Failed to close endpoint");
    }
}

/// Partial counts for the collection in flight.
///
/// Kept outside the transfer futures so a failed collection still reports how
/// far it got.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Tally {
    pub total: u64,
    pub copied: u64,
    pub write_errors: u64,
}

/// The collection replication engine.
///
/// Built from a validated [`JobConfig`] and connected [`Endpoints`]. Call
/// [`run()`](Self::run) once to replicate every selected collection.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> collection_replicator::Result<()> {
/// use collection_replicator::{Endpoints, JobConfig, ReplicationEngine};
/// use collection_replicator::store::MemoryStore;
/// use bson::doc;
/// use std::sync::Arc;
///
/// let source = Arc::new(MemoryStore::new("source").with_collection("users", vec![doc! { "_id": 1 }]));
/// let target = Arc::new(MemoryStore::new("target"));
///
/// let engine = ReplicationEngine::new(JobConfig::for_testing(100), Endpoints::live(source, target))?;
/// let results = engine.run().await?;
/// assert_eq!(results[0].copied, 1);
/// # Ok(())
/// # }
/// ```
pub struct ReplicationEngine {
    /// Job configuration (read-only for the run)
    config: JobConfig,

    /// Source and target handles
    endpoints: Endpoints,

    /// Chosen once from the config
    strategy: Box<dyn WriteStrategy>,

    /// Filter every source read uses
    predicate: Document,

    /// Progress sink
    progress: Arc<dyn ProgressReporter>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,
}

impl ReplicationEngine {
    /// Create an engine in the `Created` state.
    ///
    /// Fails with [`ReplicationError::Config`] if `config` is invalid.
    /// Endpoint presence is checked by `run()` so the handles are always
    /// closed.
    pub fn new(config: JobConfig, endpoints: Endpoints) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        metrics::set_engine_state("Created");

        Ok(Self {
            strategy: strategy_for(&config),
            predicate: build_predicate(config.incremental.as_ref()),
            config,
            endpoints,
            progress: Arc::new(NoOpProgress),
            state_tx,
            state_rx,
        })
    }

    /// Report progress to `reporter` (ignored when `show_progress` is off).
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        if self.config.show_progress {
            self.progress = reporter;
        }
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// The write strategy this run uses.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// The filter applied to source reads.
    pub fn predicate(&self) -> &Document {
        &self.predicate
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Replicate every selected collection.
    ///
    /// Returns one result per attempted collection, in processing order.
    /// Returns `Err` only for failures outside the per-collection boundary
    /// (missing endpoint, collection listing). Endpoints are closed exactly
    /// once before returning either way.
    #[instrument(skip(self), fields(mode = %self.config.mode, strategy = %self.strategy.kind()))]
    pub async fn run(&self) -> Result<Vec<CollectionResult>> {
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == EngineState::Created {
                *state = EngineState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }
        metrics::set_engine_state("Running");

        info!(
            collections = self.config.collections.len(),
            batch_size = self.config.batch_size,
            dry_run = self.config.dry_run,
            "Starting replication run"
        );

        let outcome = self.run_collections().await;
        self.endpoints.close().await;

        match outcome {
            Ok(results) => {
                let _ = self.state_tx.send(EngineState::Stopped);
                metrics::set_engine_state("Stopped");
                let failed = results.iter().filter(|r| r.status.is_failure()).count();
                info!(
                    collections = results.len(),
                    copied = results.total_copied(),
                    failed,
                    "Replication run complete"
                );
                Ok(results)
            }
            Err(e) => {
                let _ = self.state_tx.send(EngineState::Failed);
                metrics::set_engine_state("Failed");
                error!(error = %e, "Replication run aborted");
                Err(e)
            }
        }
    }

    async fn run_collections(&self) -> Result<Vec<CollectionResult>> {
        self.check_endpoints()?;
        let selected = self.select_collections().await?;
        if selected.is_empty() {
            warn!("No collections selected");
        }

        let mut results = Vec::with_capacity(selected.len());
        for name in selected {
            results.push(self.process_collection(&name).await);
        }
        Ok(results)
    }

    fn check_endpoints(&self) -> Result<()> {
        let mode = self.config.mode;
        if mode.reads_source() && self.endpoints.source.is_none() {
            return Err(ReplicationError::Config(format!("{mode} mode requires a source endpoint")));
        }
        if mode.writes_target() && self.endpoints.target.is_none() {
            return Err(ReplicationError::Config(format!("{mode} mode requires a target endpoint")));
        }
        Ok(())
    }

    /// Collections to process, in processing order.
    async fn select_collections(&self) -> Result<Vec<String>> {
        let requested = &self.config.collections;

        if self.config.mode == JobMode::Import {
            if !requested.is_empty() {
                return Ok(requested.clone());
            }
            return self.artifacts()?.list_collections().await;
        }

        let available = self
            .source()?
            .list_collections()
            .await
            .map_err(|e| ReplicationError::store("list_collections", e))?;

        if requested.is_empty() {
            return Ok(available.into_iter().filter(|name| !name.starts_with("system.")).collect());
        }

        for missing in requested.iter().filter(|r| !available.contains(r)) {
            warn!(collection = %missing, "Requested collection not found on source, skipping");
        }
        Ok(available.into_iter().filter(|name| requested.contains(name)).collect())
    }

    /// Error boundary for one collection.
    #[instrument(skip_all, fields(collection = %name))]
    async fn process_collection(&self, name: &str) -> CollectionResult {
        let start = Instant::now();
        let mut tally = Tally::default();
        let progress = ProgressSession::new(self.progress.clone(), name);

        let outcome = match self.config.mode {
            JobMode::Live => self.replicate_live(name, &mut tally, &progress).await,
            JobMode::Export => self.export_collection(name, &mut tally, &progress).await,
            JobMode::Import => self.import_collection(name, &mut tally, &progress).await,
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(ReplicationError::SchemaValidation(message)) => {
                warn!(collection = %name, error = %message, "Schema validation failed, collection skipped");
                CollectionResult::new(name, CollectionStatus::SchemaValidationFailed, 0, tally.total)
                    .with_error(message)
            }
            Err(e) => {
                error!(
                    collection = %name,
                    copied = tally.copied,
                    total = tally.total,
                    error = %e,
                    "Collection failed"
                );
                CollectionResult::new(name, CollectionStatus::Failed, tally.copied, tally.total)
                    .with_error(e.to_string())
            }
        };

        let elapsed = start.elapsed();
        result.write_errors = tally.write_errors;
        result.duration_ms = duration_millis(elapsed);
        metrics::record_collection_result(name, result.status.as_str(), elapsed);

        info!(
            collection = %name,
            status = %result.status,
            copied = result.copied,
            total = result.total,
            "Collection finished"
        );
        result
    }

    /// Whether a run writes a probe document before transferring.
    fn probe_enabled(&self) -> bool {
        self.config.validate_schema && !self.config.dry_run && self.config.mode.writes_target()
    }

    fn source(&self) -> Result<&dyn DocumentStore> {
        self.endpoints
            .source
            .as_deref()
            .ok_or_else(|| ReplicationError::Config("no source endpoint".to_string()))
    }

    fn target(&self) -> Result<&dyn DocumentStore> {
        self.endpoints
            .target
            .as_deref()
            .ok_or_else(|| ReplicationError::Config("no target endpoint".to_string()))
    }

    fn artifacts(&self) -> Result<ArtifactStore> {
        self.config
            .artifact_dir
            .as_ref()
            .map(ArtifactStore::new)
            .ok_or_else(|| ReplicationError::Config(format!("{} mode requires an artifact directory", self.config.mode)))
    }

    fn cursor_batch_size(&self) -> u32 {
        u32::try_from(self.config.batch_size).unwrap_or(u32::MAX)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn duration_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bson::doc;

    fn users() -> Vec<Document> {
        vec![doc! { "_id": 1, "n": "a" }, doc! { "_id": 2, "n": "b" }, doc! { "_id": 3, "n": "c" }]
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_millis(Duration::from_micros(999)), 0);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = ReplicationEngine::new(JobConfig::for_testing(0), Endpoints::default());
        assert!(matches!(result, Err(ReplicationError::Config(_))));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let source = Arc::new(MemoryStore::new("s").with_collection("users", users()));
        let target = Arc::new(MemoryStore::new("t"));
        let engine = ReplicationEngine::new(JobConfig::for_testing(2), Endpoints::live(source, target)).unwrap();

        let rx = engine.state_receiver();
        assert_eq!(engine.state(), EngineState::Created);
        engine.run().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(*rx.borrow(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_second_run_is_invalid_state() {
        let source = Arc::new(MemoryStore::new("s"));
        let target = Arc::new(MemoryStore::new("t"));
        let engine = ReplicationEngine::new(JobConfig::for_testing(2), Endpoints::live(source, target)).unwrap();

        engine.run().await.unwrap();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidState { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_target_fails_run_and_closes_source() {
        let source = Arc::new(MemoryStore::new("s").with_collection("users", users()));
        let engine = ReplicationEngine::new(JobConfig::for_testing(2), Endpoints::export(source.clone())).unwrap();

        let err = engine.run().await.unwrap_err();
        assert!(err.to_string().contains("target"));
        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(source.close_count(), 1);
        assert!(source.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_shared_endpoint_closed_once() {
        let store = Arc::new(MemoryStore::new("same"));
        let endpoints = Endpoints::live(store.clone(), store.clone());
        endpoints.close().await;
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_selection_follows_source_order_and_skips_system() {
        let source = Arc::new(
            MemoryStore::new("s")
                .with_collection("zeta", vec![])
                .with_collection("system.views", vec![])
                .with_collection("alpha", vec![]),
        );
        let target = Arc::new(MemoryStore::new("t"));
        let engine = ReplicationEngine::new(JobConfig::for_testing(2), Endpoints::live(source, target)).unwrap();

        let names: Vec<String> = engine.run().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_requested_selection_intersects_in_source_order() {
        let source = Arc::new(
            MemoryStore::new("s")
                .with_collection("a", vec![])
                .with_collection("b", vec![])
                .with_collection("c", vec![]),
        );
        let target = Arc::new(MemoryStore::new("t"));
        let mut config = JobConfig::for_testing(2);
        config.collections = vec!["c".into(), "missing".into(), "a".into()];
        let engine = ReplicationEngine::new(config, Endpoints::live(source, target)).unwrap();

        let names: Vec<String> = engine.run().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_collection_failure_is_isolated() {
        let source = Arc::new(
            MemoryStore::new("s")
                .with_collection("bad", users())
                .with_collection("good", users())
                .with_failing_collection("bad"),
        );
        let target = Arc::new(MemoryStore::new("t"));
        let engine = ReplicationEngine::new(JobConfig::for_testing(2), Endpoints::live(source, target.clone())).unwrap();

        let results = engine.run().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CollectionStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("simulated read failure"));
        assert_eq!(results[1].status, CollectionStatus::Copied);
        assert_eq!(target.documents("good").await.len(), 3);
        assert!(target.operations_on("bad").await.is_empty());
        assert!(results.has_failures());
    }

    #[test]
    fn test_probe_enabled_rules() {
        let mut config = JobConfig::for_testing(2);
        config.validate_schema = true;
        let engine = ReplicationEngine::new(config.clone(), Endpoints::default()).unwrap();
        assert!(engine.probe_enabled());

        config.dry_run = true;
        let engine = ReplicationEngine::new(config.clone(), Endpoints::default()).unwrap();
        assert!(!engine.probe_enabled());

        config.dry_run = false;
        config.mode = JobMode::Export;
        config.artifact_dir = Some("/tmp/x".into());
        let engine = ReplicationEngine::new(config, Endpoints::default()).unwrap();
        assert!(!engine.probe_enabled());
    }
}
