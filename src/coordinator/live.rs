// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live path: source cursor → write strategy → target.
//!
//! The shared [`transfer`](ReplicationEngine::transfer) loop is also used by
//! imports, with the artifact contents as the batch source.

use super::{CollectionResult, CollectionStatus, ReplicationEngine, Tally};
use crate::batch::BatchStreamer;
use crate::error::{ReplicationError, Result};
use crate::indexes::replicate_indexes;
use crate::metrics;
use crate::probe::probe_collection;
use crate::progress::ProgressSession;
use crate::store::DocumentStore;
use tracing::{debug, info};

impl ReplicationEngine {
    /// Replicate one collection from the source endpoint to the target.
    pub(super) async fn replicate_live(
        &self,
        name: &str,
        tally: &mut Tally,
        progress: &ProgressSession,
    ) -> Result<CollectionResult> {
        let source = self.source()?;
        let target = self.target()?;

        tally.total = source
            .count_documents(name, self.predicate.clone())
            .await
            .map_err(|e| ReplicationError::store("count_documents", e))?;

        if tally.total == 0 {
            let status = if self.config.is_incremental() {
                CollectionStatus::NoNewDocs
            } else {
                CollectionStatus::Empty
            };
            return Ok(CollectionResult::new(name, status, 0, 0));
        }

        if self.probe_enabled() {
            probe_collection(source, target, name, &self.predicate).await?;
        }

        if self.config.dry_run {
            info!(collection = %name, total = tally.total, "Dry run, target untouched");
            return Ok(CollectionResult::new(name, CollectionStatus::DryRun, 0, tally.total));
        }

        let stream = source
            .find(name, self.predicate.clone(), self.cursor_batch_size())
            .await
            .map_err(|e| ReplicationError::store("find", e))?;
        let streamer = BatchStreamer::new(stream, self.config.batch_size);
        self.transfer(target, name, streamer, tally, progress).await?;

        let mut result = if self.config.is_incremental() {
            CollectionResult::new(name, CollectionStatus::IncrementalCopied, tally.copied, tally.total)
        } else {
            CollectionResult::new(name, CollectionStatus::Copied, tally.copied, tally.total)
        };

        if self.config.copy_indexes {
            result.indexes = replicate_indexes(source, target, name).await;
        }
        Ok(result)
    }

    /// Prepare the target collection, then commit every batch.
    ///
    /// `tally.copied` is updated after each committed batch so a mid-stream
    /// failure still reports what already landed.
    pub(super) async fn transfer(
        &self,
        target: &dyn DocumentStore,
        name: &str,
        mut streamer: BatchStreamer,
        tally: &mut Tally,
        progress: &ProgressSession,
    ) -> Result<()> {
        let cleared = self.strategy.prepare(target, name).await?;
        if cleared > 0 {
            debug!(collection = %name, cleared, "Existing target documents removed");
        }

        progress.start(tally.total);
        while let Some(batch) = streamer.next_batch().await? {
            metrics::record_documents_read(name, batch.len());
            let outcome = self.strategy.apply_batch(target, name, batch).await?;
            tally.copied += outcome.attempted;
            tally.write_errors += outcome.errors;
            progress.advance(tally.copied);
        }

        let stats = streamer.stats();
        debug!(
            collection = %name,
            batches = stats.batches,
            documents = stats.documents,
            write_errors = tally.write_errors,
            "Transfer complete"
        );
        Ok(())
    }
}
