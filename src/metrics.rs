// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emits Prometheus-compatible metrics for:
//! - Documents read from sources and written to targets
//! - Batch commit latency and per-document write errors
//! - Collection outcomes by status
//! - Index replication and schema probes
//! - Engine lifecycle state
//!
//! No recorder is installed here. Without one every call is a no-op; an
//! embedding application installs its exporter of choice.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replicator_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use collection_replicator::metrics;
//! use std::time::Duration;
//!
//! // After a batch commit
//! metrics::record_batch_flush("orders", "full-replace", 1000, 2, Duration::from_millis(40));
//!
//! // After a collection finishes
//! metrics::record_collection_result("orders", "copied", Duration::from_secs(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Transfer Metrics
// =============================================================================

/// Record documents pulled from a source cursor (or artifact).
pub fn record_documents_read(collection: &str, count: usize) {
    counter!("replicator_documents_read_total", "collection" => collection.to_string())
        .increment(count as u64);
}

/// Record one batch commit against the target.
pub fn record_batch_flush(
    collection: &str,
    strategy: &str,
    attempted: u64,
    errors: u64,
    duration: Duration,
) {
    let collection = collection.to_string();
    let strategy = strategy.to_string();

    counter!(
        "replicator_documents_written_total",
        "collection" => collection.clone(),
        "strategy" => strategy.clone()
    )
    .increment(attempted.saturating_sub(errors));

    if errors > 0 {
        counter!("replicator_write_errors_total", "collection" => collection.clone()).increment(errors);
    }

    histogram!("replicator_batch_flush_duration_seconds", "strategy" => strategy)
        .record(duration.as_secs_f64());
    histogram!("replicator_batch_size", "collection" => collection).record(attempted as f64);
}

/// Record documents cleared from a target before a full replace.
pub fn record_documents_cleared(collection: &str, count: u64) {
    counter!("replicator_documents_cleared_total", "collection" => collection.to_string())
        .increment(count);
}

/// Record documents written to an export artifact.
pub fn record_documents_exported(collection: &str, count: u64) {
    counter!("replicator_documents_exported_total", "collection" => collection.to_string())
        .increment(count);
}

// =============================================================================
// Collection Metrics
// =============================================================================

/// Record a terminal collection status and how long the collection took.
pub fn record_collection_result(collection: &str, status: &str, duration: Duration) {
    counter!("replicator_collections_total", "status" => status.to_string()).increment(1);
    histogram!("replicator_collection_duration_seconds", "collection" => collection.to_string())
        .record(duration.as_secs_f64());
}

/// Record a schema probe attempt.
pub fn record_schema_probe(collection: &str, outcome: &str) {
    counter!(
        "replicator_schema_probes_total",
        "collection" => collection.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record index replication results for one collection.
pub fn record_index_replication(collection: &str, created: usize, failed: usize) {
    let collection = collection.to_string();
    counter!("replicator_indexes_created_total", "collection" => collection.clone())
        .increment(created as u64);
    if failed > 0 {
        counter!("replicator_index_failures_total", "collection" => collection).increment(failed as u64);
    }
}

// =============================================================================
// Engine Metrics
// =============================================================================

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Stopped" => 2.0,
        "Failed" => 3.0,
        _ => -1.0,
    };
    gauge!("replicator_engine_state").set(value);
}

/// Record an endpoint connection attempt.
pub fn record_connection_attempt(endpoint: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replicator_connection_attempts_total",
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate uses global state and no recorder is installed in
    // tests, so these only check the calls accept edge-case inputs.

    #[test]
    fn test_record_transfer_metrics() {
        record_documents_read("orders", 100);
        record_documents_read("orders", 0);
        record_documents_cleared("orders", 42);
        record_documents_exported("orders", 7);
    }

    #[test]
    fn test_record_batch_flush_with_errors() {
        record_batch_flush("orders", "full-replace", 10, 3, Duration::from_millis(5));
        record_batch_flush("orders", "incremental-upsert", 0, 0, Duration::ZERO);
        // errors larger than attempted never underflows
        record_batch_flush("orders", "full-replace", 1, 5, Duration::ZERO);
    }

    #[test]
    fn test_record_collection_metrics() {
        record_collection_result("orders", "copied", Duration::from_secs(1));
        record_collection_result("", "failed", Duration::ZERO);
        record_schema_probe("orders", "validated");
        record_index_replication("orders", 3, 0);
        record_index_replication("orders", 0, 2);
    }

    #[test]
    fn test_set_engine_state_all_states() {
        for state in ["Created", "Running", "Stopped", "Failed", "Unknown"] {
            set_engine_state(state);
        }
    }

    #[test]
    fn test_record_connection_attempt() {
        record_connection_attempt("source", true);
        record_connection_attempt("target", false);
    }
}
