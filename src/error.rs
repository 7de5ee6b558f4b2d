// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the collection replicator.
//!
//! Errors are split in two layers:
//!
//! - [`StoreError`] is what a [`DocumentStore`](crate::store::DocumentStore)
//!   backend returns. It knows nothing about collections or runs.
//! - [`ReplicationError`] is what the engine returns. It wraps store errors with
//!   the operation that failed and adds configuration, artifact and state errors.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Connection` | Yes | Endpoint unreachable before the run started |
//! | `Config` | Yes | Job configuration invalid |
//! | `InvalidState` | Yes | Engine run twice |
//! | `Store` | No | Read/write failure inside one collection |
//! | `Artifact` | No | Snapshot file malformed or unreadable |
//! | `Io` | No | Local filesystem error while writing a snapshot |
//! | `SchemaValidation` | No | Probe write rejected by the target |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Fatal vs Collection-Scoped
//!
//! Use [`ReplicationError::is_fatal()`] to tell errors that must abort the whole
//! run from those the orchestrator records against a single collection.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Error returned by a document store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A write collided with an existing identity or unique index.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The store refused the document (validator, size limit, bad field name).
    #[error("document rejected: {0}")]
    Rejected(String),

    /// The collection does not exist on this endpoint.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Anything else reported by the backend (network, auth, server error).
    #[error("{0}")]
    Backend(String),
}

/// Errors that can occur during a replication run.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A store operation failed.
    ///
    /// Scoped to the collection being processed when it happens inside the
    /// per-collection loop.
    #[error("Store error ({operation}): {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// Endpoint connection failure during bootstrap.
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Invalid or missing configuration.
    ///
    /// Raised by [`JobConfig::validate()`](crate::config::JobConfig::validate)
    /// before any collection is touched.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A snapshot artifact could not be parsed or has the wrong shape.
    #[error("Artifact error ({path}): {message}")]
    Artifact { path: String, message: String },

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The schema probe write (or its cleanup delete) was rejected.
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Wrap a store error with the operation that produced it.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }

    /// Create an artifact error for a path.
    pub fn artifact(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Check if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Config(_) => true,
            Self::InvalidState { .. } => true,
            Self::Store { .. } => false,
            Self::Artifact { .. } => false,
            Self::Io(_) => false,
            Self::SchemaValidation(_) => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_formatting() {
        let err = ReplicationError::store("insert_many", StoreError::Backend("timeout".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("Store error"));
        assert!(msg.contains("insert_many"));
        assert!(msg.contains("timeout"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_store_error_source_chain() {
        let err = ReplicationError::store("find", StoreError::NamespaceNotFound("db.users".into()));
        let source = std::error::Error::source(&err).expect("store errors carry a source");
        assert_eq!(source.to_string(), "namespace not found: db.users");
    }

    #[test]
    fn test_fatal_connection() {
        let err = ReplicationError::Connection {
            endpoint: "source".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_fatal_config() {
        let err = ReplicationError::Config("batch_size must be positive".to_string());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fatal_invalid_state() {
        let err = ReplicationError::InvalidState {
            expected: "Created".to_string(),
            actual: "Stopped".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Stopped"));
    }

    #[test]
    fn test_collection_scoped_errors() {
        assert!(!ReplicationError::SchemaValidation("rejected".into()).is_fatal());
        assert!(!ReplicationError::artifact("/tmp/users.json", "not an array").is_fatal());
        assert!(!ReplicationError::Internal("unexpected".into()).is_fatal());
    }

    #[test]
    fn test_artifact_error_includes_path() {
        let err = ReplicationError::artifact("/tmp/out/users.json", "expected a JSON array");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out/users.json"));
        assert!(msg.contains("expected a JSON array"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: ReplicationError = io.into();
        assert!(matches!(err, ReplicationError::Io(_)));
        assert!(!err.is_fatal());
    }
}
