// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a replication job.
//!
//! A [`JobConfig`] is built once (programmatically, from TOML, or by the CLI),
//! validated once with [`JobConfig::validate()`], and then handed read-only to
//! [`ReplicationEngine::new()`](crate::ReplicationEngine::new).
//!
//! # Quick Start
//!
//! ```rust
//! use collection_replicator::config::{JobConfig, EndpointConfig};
//!
//! let config = JobConfig {
//!     source: Some(EndpointConfig::new("mongodb://source:27017", "shop")),
//!     target: Some(EndpointConfig::new("mongodb://target:27017", "shop")),
//!     collections: vec!["orders".into()],
//!     batch_size: 500,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! JobConfig
//! ├── source / target: EndpointConfig   # uri, database, connect_timeout
//! ├── collections: Vec<String>          # empty = every source collection
//! ├── batch_size: usize                 # documents per write window
//! ├── mode: live | export | import
//! ├── artifact_dir: Option<PathBuf>     # snapshot directory (export/import)
//! ├── incremental: Option<IncrementalConfig>
//! │   ├── timestamp_field: String
//! │   ├── since: Option<DateTime<Utc>>
//! │   └── missing_field: exclude | include
//! ├── id_field: String                  # upsert identity, default "_id"
//! └── dry_run / copy_indexes / validate_schema / show_progress
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! collections = ["orders", "customers"]
//! batch_size = 1000
//! copy_indexes = true
//!
//! [source]
//! uri = "mongodb://prod-replica:27017"
//! database = "shop"
//!
//! [target]
//! uri = "mongodb://staging:27017"
//! database = "shop"
//! connect_timeout = "5s"
//!
//! [incremental]
//! timestamp_field = "updatedAt"
//! since = "2026-01-01T00:00:00Z"
//! ```

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// JobConfig: the whole job
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Source endpoint. Required for live and export runs.
    #[serde(default)]
    pub source: Option<EndpointConfig>,

    /// Target endpoint. Required for live and import runs.
    #[serde(default)]
    pub target: Option<EndpointConfig>,

    /// Collections to replicate. Empty means every collection on the source
    /// (or every snapshot in `artifact_dir` when importing).
    #[serde(default)]
    pub collections: Vec<String>,

    /// Maximum documents per write window.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Where documents come from and go to.
    #[serde(default)]
    pub mode: JobMode,

    /// Snapshot directory for export/import runs.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Incremental sync parameters. `None` means full overwrite.
    #[serde(default)]
    pub incremental: Option<IncrementalConfig>,

    /// Field used as document identity for upserts.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Count and report, but never write to the target.
    #[serde(default)]
    pub dry_run: bool,

    /// Replicate secondary index definitions after the data.
    #[serde(default)]
    pub copy_indexes: bool,

    /// Run a test write/delete on the target before transferring.
    #[serde(default)]
    pub validate_schema: bool,

    /// Emit progress events to the configured reporter.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_batch_size() -> usize {
    1000
}

fn default_id_field() -> String {
    "_id".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            source: None,
            target: None,
            collections: Vec::new(),
            batch_size: 1000,
            mode: JobMode::Live,
            artifact_dir: None,
            incremental: None,
            id_field: "_id".to_string(),
            dry_run: false,
            copy_indexes: false,
            validate_schema: false,
            show_progress: true,
        }
    }
}

impl JobConfig {
    /// Minimal config for tests: no endpoints, progress off.
    pub fn for_testing(batch_size: usize) -> Self {
        Self {
            batch_size,
            show_progress: false,
            ..Default::default()
        }
    }

    /// Parse a job from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ReplicationError::Config(format!("invalid job file: {e}")))
    }

    /// Load a job from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Whether this run upserts instead of overwriting.
    pub fn is_incremental(&self) -> bool {
        self.incremental.is_some()
    }

    /// Whether this run clears target collections before writing.
    pub fn is_destructive(&self) -> bool {
        !self.dry_run && !self.is_incremental() && self.mode.writes_target()
    }

    /// Check the engine-level invariants.
    ///
    /// Endpoint presence is checked separately by
    /// [`validate_endpoints()`](Self::validate_endpoints) because the engine
    /// receives store handles, not endpoint configs.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ReplicationError::Config(
                "batch_size must be a positive integer".to_string(),
            ));
        }

        if self.id_field.trim().is_empty() {
            return Err(ReplicationError::Config("id_field must not be empty".to_string()));
        }

        if let Some(incremental) = &self.incremental {
            if incremental.timestamp_field.trim().is_empty() {
                return Err(ReplicationError::Config(
                    "incremental sync requires a non-empty timestamp_field".to_string(),
                ));
            }
        }

        if self.mode.uses_artifacts() && self.artifact_dir.is_none() {
            return Err(ReplicationError::Config(format!(
                "{} mode requires an artifact directory",
                self.mode
            )));
        }

        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(ReplicationError::Config(
                "collection names must not be empty".to_string(),
            ));
        }

        for endpoint in self.source.iter().chain(self.target.iter()) {
            endpoint.validate()?;
        }

        Ok(())
    }

    /// Check that the endpoints this mode needs are configured.
    pub fn validate_endpoints(&self) -> Result<()> {
        if self.mode.reads_source() && self.source.is_none() {
            return Err(ReplicationError::Config(format!(
                "{} mode requires a source endpoint",
                self.mode
            )));
        }
        if self.mode.writes_target() && self.target.is_none() {
            return Err(ReplicationError::Config(format!(
                "{} mode requires a target endpoint",
                self.mode
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JobMode
// ═══════════════════════════════════════════════════════════════════════════════

/// Where documents are read from and written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Source endpoint → target endpoint.
    #[default]
    Live,
    /// Source endpoint → JSON snapshot files.
    Export,
    /// JSON snapshot files → target endpoint.
    Import,
}

impl JobMode {
    pub fn reads_source(self) -> bool {
        matches!(self, Self::Live | Self::Export)
    }

    pub fn writes_target(self) -> bool {
        matches!(self, Self::Live | Self::Import)
    }

    pub fn uses_artifacts(self) -> bool {
        matches!(self, Self::Export | Self::Import)
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IncrementalConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Timestamp-filtered sync parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncrementalConfig {
    /// Document field compared against `since`.
    pub timestamp_field: String,

    /// Lower bound (inclusive). `None` copies everything.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// What to do with documents that lack `timestamp_field`.
    #[serde(default)]
    pub missing_field: MissingTimestampPolicy,
}

impl IncrementalConfig {
    pub fn new(timestamp_field: impl Into<String>, since: Option<DateTime<Utc>>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
            since,
            missing_field: MissingTimestampPolicy::Exclude,
        }
    }
}

/// Policy for documents without the incremental timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTimestampPolicy {
    /// Untagged documents never match `$gte` and are left out.
    #[default]
    Exclude,
    /// Untagged documents are always copied.
    Include,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EndpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for one document store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Connection string, e.g. `"mongodb://host:27017/?replicaSet=rs0"`.
    pub uri: String,

    /// Database the job reads from or writes to.
    pub database: String,

    /// Connect and server-selection timeout as a duration string (e.g. "10s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Application name reported to the server.
    #[serde(default)]
    pub app_name: Option<String>,
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

impl EndpointConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            connect_timeout: default_connect_timeout(),
            app_name: None,
        }
    }

    /// Parse the connect_timeout string to a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// URI with any password replaced, for logs.
    pub fn redacted_uri(&self) -> String {
        match (self.uri.find("://"), self.uri.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                let credentials = &self.uri[scheme_end + 3..at];
                let user = credentials.split(':').next().unwrap_or("");
                format!("{}{}:***{}", &self.uri[..scheme_end + 3], user, &self.uri[at..])
            }
            _ => self.uri.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(ReplicationError::Config("endpoint uri must not be empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(ReplicationError::Config(
                "endpoint database must not be empty".to_string(),
            ));
        }
        humantime::parse_duration(&self.connect_timeout).map_err(|e| {
            ReplicationError::Config(format!(
                "invalid connect_timeout {:?}: {e}",
                self.connect_timeout
            ))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
