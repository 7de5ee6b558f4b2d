// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot paths: source → artifact (export) and artifact → target (import).

use super::{CollectionResult, CollectionStatus, ReplicationEngine, Tally};
use crate::batch::BatchStreamer;
use crate::error::{ReplicationError, Result};
use crate::indexes::{apply_index_definitions, definitions_from_specs, IndexReport};
use crate::metrics;
use crate::probe::probe_with_sample;
use crate::progress::ProgressSession;
use tracing::{info, warn};

impl ReplicationEngine {
    /// Write the predicate-matched documents of `name` to its data artifact.
    pub(super) async fn export_collection(
        &self,
        name: &str,
        tally: &mut Tally,
        progress: &ProgressSession,
    ) -> Result<CollectionResult> {
        let source = self.source()?;
        let artifacts = self.artifacts()?;

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

        if self.config.dry_run {
            return Ok(CollectionResult::new(name, CollectionStatus::DryRun, 0, tally.total));
        }

        let stream = source
            .find(name, self.predicate.clone(), self.cursor_batch_size())
            .await
            .map_err(|e| ReplicationError::store("find", e))?;
        let mut streamer = BatchStreamer::new(stream, self.config.batch_size);
        let mut writer = artifacts.writer(name).await?;

        progress.start(tally.total);
        while let Some(batch) = streamer.next_batch().await? {
            metrics::record_documents_read(name, batch.len());
            writer.write_batch(&batch).await?;
            tally.copied += batch.len() as u64;
            progress.advance(tally.copied);
        }
        let written = writer.finish().await?;
        metrics::record_documents_exported(name, written);
        info!(
            collection = %name,
            documents = written,
            path = %artifacts.data_path(name).display(),
            "Collection exported"
        );

        let mut result = CollectionResult::new(name, CollectionStatus::Exported, tally.copied, tally.total);
        if self.config.copy_indexes {
            result.indexes = self.export_indexes(name).await;
        }
        Ok(result)
    }

    /// Best effort: listing or writing failures are logged.
    async fn export_indexes(&self, name: &str) -> IndexReport {
        let (source, artifacts) = match (self.source(), self.artifacts()) {
            (Ok(source), Ok(artifacts)) => (source, artifacts),
            _ => return IndexReport::default(),
        };

        let specs = match source.list_indexes(name).await {
            Ok(specs) => specs,
            Err(e) => {
                warn!(collection = %name, error = %e, "Could not list source indexes");
                return IndexReport::default();
            }
        };
        let definitions = definitions_from_specs(&specs);

        match artifacts.write_indexes(name, &definitions).await {
            Ok(()) => IndexReport {
                created: definitions.len(),
                failed: 0,
            },
            Err(e) => {
                warn!(collection = %name, error = %e, "Could not write index artifact");
                IndexReport {
                    created: 0,
                    failed: definitions.len(),
                }
            }
        }
    }

    /// Load `name` from its data artifact into the target.
    pub(super) async fn import_collection(
        &self,
        name: &str,
        tally: &mut Tally,
        progress: &ProgressSession,
    ) -> Result<CollectionResult> {
        let target = self.target()?;
        let artifacts = self.artifacts()?;

        let documents = match artifacts.read_documents(name).await? {
            None => {
                warn!(
                    collection = %name,
                    path = %artifacts.data_path(name).display(),
                    "No artifact for collection"
                );
                return Ok(CollectionResult::new(name, CollectionStatus::NoSourceFile, 0, 0));
            }
            Some(documents) if documents.is_empty() => {
                return Ok(CollectionResult::new(name, CollectionStatus::SourceEmpty, 0, 0));
            }
            Some(documents) => documents,
        };
        tally.total = documents.len() as u64;

        if self.probe_enabled() {
            if let Some(sample) = documents.first() {
                probe_with_sample(target, name, sample.clone()).await?;
            }
        }

        if self.config.dry_run {
            return Ok(CollectionResult::new(name, CollectionStatus::DryRun, 0, tally.total));
        }

        self.transfer(
            target,
            name,
            BatchStreamer::from_documents(documents, self.config.batch_size),
            tally,
            progress,
        )
        .await?;

        let mut result = CollectionResult::new(name, CollectionStatus::Imported, tally.copied, tally.total);
        if self.config.copy_indexes {
            result.indexes = match artifacts.read_indexes(name).await {
                Ok(definitions) => apply_index_definitions(target, name, &definitions).await,
                Err(e) => {
                    warn!(collection = %name, error = %e, "Could not read index artifact");
                    IndexReport::default()
                }
            };
        }
        Ok(result)
    }
}
