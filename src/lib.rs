// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Collection Replicator
//!
//! Copies named collections from a source document store to a target, either
//! directly or through a directory of JSON snapshot artifacts.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          collection-replicator                            │
//! │                                                                           │
//! │  ┌──────────┐  predicate  ┌───────────────┐  batches  ┌───────────────┐   │
//! │  │  source  │────────────►│ BatchStreamer │──────────►│ WriteStrategy │   │
//! │  │  store   │             │ (bounded)     │           │ replace/upsert│   │
//! │  └──────────┘             └───────────────┘           └───────┬───────┘   │
//! │       │                          ▲                            ▼           │
//! │       │ export             import│                    ┌───────────────┐   │
//! │       ▼                          │                    │ target store  │   │
//! │  ┌─────────────────────────────────────┐              └───────────────┘   │
//! │  │ ArtifactStore  <name>.json          │                                  │
//! │  │                <name>.indexes.json  │                                  │
//! │  └─────────────────────────────────────┘                                  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Modes
//!
//! 1. **Full overwrite**: the target collection is cleared, then every source
//!    document is inserted unordered.
//! 2. **Incremental**: only documents whose timestamp field is at or after
//!    `since` are read, and each is upserted by its identity field.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collection_replicator::{connect_endpoints, JobConfig, ReplicationEngine, RetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> collection_replicator::Result<()> {
//!     let config = JobConfig::load("job.toml")?;
//!     let endpoints = connect_endpoints(&config, &RetryConfig::startup()).await?;
//!
//!     let engine = ReplicationEngine::new(config, endpoints)?;
//!     for result in engine.run().await? {
//!         println!("{}: {} ({}/{})", result.name, result.status, result.copied, result.total);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod indexes;
pub mod metrics;
pub mod mongo;
pub mod probe;
pub mod progress;
pub mod query;
pub mod resilience;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use artifact::ArtifactStore;
pub use config::{EndpointConfig, IncrementalConfig, JobConfig, JobMode, MissingTimestampPolicy};
pub use coordinator::{CollectionResult, CollectionStatus, Endpoints, EngineState, ReplicationEngine, RunSummary};
pub use error::{ReplicationError, Result, StoreError};
pub use mongo::{connect_endpoints, MongoStore};
pub use progress::{NoOpProgress, ProgressReporter, TerminalProgress};
pub use resilience::RetryConfig;
pub use store::{DocumentStore, MemoryStore};
pub use strategy::StrategyKind;
