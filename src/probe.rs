// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema probe: a test write on the target before transferring.
//!
//! One sample document is stripped of `_id`, tagged with
//! [`PROBE_MARKER_FIELD`], inserted into the target collection and deleted
//! again by its generated `_id`. A rejection of either step means the target
//! would refuse the data (validator, unique index, field restrictions), so the
//! collection is reported as `schema-validation-failed` instead of half-copied.

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::store::DocumentStore;
use bson::{doc, Bson, Document};
use tracing::{debug, warn};

/// Sentinel field on probe documents, so leftovers are easy to find.
pub const PROBE_MARKER_FIELD: &str = "__replicator_schema_probe";

/// What the probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Insert and delete both succeeded.
    Validated,
    /// No sample document matched; nothing was written.
    NoSample,
}

/// Probe `collection` on `target` with a document sampled from `source`.
pub async fn probe_collection(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    collection: &str,
    predicate: &Document,
) -> Result<ProbeOutcome> {
    let sample = source
        .find_one(collection, predicate.clone())
        .await
        .map_err(|e| ReplicationError::store("find_one", e))?;

    match sample {
        Some(sample) => probe_with_sample(target, collection, sample).await,
        None => {
            debug!(collection = %collection, "No sample document, schema probe skipped");
            Ok(ProbeOutcome::NoSample)
        }
    }
}

/// Probe `collection` on `target` with a caller-supplied sample.
pub async fn probe_with_sample(
    target: &dyn DocumentStore,
    collection: &str,
    mut sample: Document,
) -> Result<ProbeOutcome> {
    sample.remove("_id");
    sample.insert(PROBE_MARKER_FIELD, true);

    let probe_id = match target.insert_one(collection, sample).await {
        Ok(id) => id,
        Err(e) => {
            metrics::record_schema_probe(collection, "rejected");
            warn!(collection = %collection, error = %e, "Schema probe insert rejected");
            return Err(ReplicationError::SchemaValidation(format!(
                "probe insert into {collection} rejected: {e}"
            )));
        }
    };

    if let Err(e) = target.delete_one(collection, id_filter(probe_id)).await {
        metrics::record_schema_probe(collection, "cleanup_failed");
        warn!(collection = %collection, error = %e, "Schema probe cleanup failed");
        return Err(ReplicationError::SchemaValidation(format!(
            "probe cleanup in {collection} failed: {e}"
        )));
    }

    metrics::record_schema_probe(collection, "validated");
    debug!(collection = %collection, "Schema probe passed");
    Ok(ProbeOutcome::Validated)
}

fn id_filter(id: Bson) -> Document {
    doc! { "_id": id }
}
