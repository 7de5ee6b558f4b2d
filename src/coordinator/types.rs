// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state and result types.
//!
//! # State Transitions
//!
//! ```text
//!              run()
//! Created ─────────────→ Running
//!                           │
//!              ┌────────────┴────────────┐
//!              │ (all collections        │ (fatal error: listing,
//!              │  attempted)             │  missing endpoint)
//!              ↓                         ↓
//!           Stopped                   Failed
//! ```
//!
//! - **Created**: after `ReplicationEngine::new()`. Nothing touched yet.
//! - **Running**: `run()` in progress.
//! - **Stopped**: every selected collection has a result. Individual
//!   collections may still have failed.
//! - **Failed**: the run aborted before producing results.
//!
//! Both terminal states are final: `run()` can only be called once.

use crate::indexes::IndexReport;
use serde::Serialize;

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not run.
    Created,

    /// Run in progress.
    Running,

    /// Run finished.
    Stopped,

    /// Run aborted by a fatal error.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Terminal status of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionStatus {
    /// Full copy, source had no documents.
    Empty,
    /// Incremental copy, nothing matched the predicate.
    NoNewDocs,
    /// Counted only.
    DryRun,
    /// Schema probe write was rejected by the target.
    SchemaValidationFailed,
    /// Import: no data artifact for the collection.
    NoSourceFile,
    /// Import: data artifact holds an empty array.
    SourceEmpty,
    /// Import finished.
    Imported,
    /// Export finished.
    Exported,
    /// Incremental live copy finished.
    IncrementalCopied,
    /// Full live copy finished.
    Copied,
    /// Transfer aborted by an error.
    Failed,
}

impl CollectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NoNewDocs => "no-new-docs",
            Self::DryRun => "dry-run",
            Self::SchemaValidationFailed => "schema-validation-failed",
            Self::NoSourceFile => "no-source-file",
            Self::SourceEmpty => "source-empty",
            Self::Imported => "imported",
            Self::Exported => "exported",
            Self::IncrementalCopied => "incremental-copied",
            Self::Copied => "copied",
            Self::Failed => "failed",
        }
    }

    /// Whether the collection counts against the run's exit status.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::SchemaValidationFailed)
    }
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one collection. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionResult {
    pub name: String,
    /// Documents handed to the target (or written to the artifact).
    pub copied: u64,
    /// Documents matching the predicate when the collection started.
    pub total: u64,
    pub status: CollectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Documents the target refused inside otherwise successful batches.
    #[serde(skip_serializing_if = "is_zero")]
    pub write_errors: u64,
    #[serde(skip_serializing_if = "IndexReport::is_empty")]
    pub indexes: IndexReport,
    pub duration_ms: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl CollectionResult {
    pub fn new(name: impl Into<String>, status: CollectionStatus, copied: u64, total: u64) -> Self {
        Self {
            name: name.into(),
            copied,
            total,
            status,
            error: None,
            write_errors: 0,
            indexes: IndexReport::default(),
            duration_ms: 0,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Convenience view over a run's results.
pub trait RunSummary {
    /// Whether any collection failed or failed schema validation.
    fn has_failures(&self) -> bool;

    /// Total documents copied across collections.
    fn total_copied(&self) -> u64;
}

impl RunSummary for [CollectionResult] {
    fn has_failures(&self) -> bool {
        self.iter().any(|r| r.status.is_failure())
    }

    fn total_copied(&self) -> u64 {
        self.iter().map(|r| r.copied).sum()
    }
}
