// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch streamer over a source cursor.
//!
//! Groups a single-pass document stream into bounded windows that a write
//! strategy (or the export writer) commits one at a time.
//!
//! # Design
//!
//! ```text
//! DocumentStream ──▶ BatchStreamer ──▶ DocumentBatch (≤ batch_size)
//!   (cursor)          │                   │
//!                     │ Vec buffer        ▼
//!                     │ (cursor order)  WriteStrategy::apply_batch()
//!                     ▼
//!                 StreamStats
//! ```
//!
//! Every batch holds exactly `batch_size` documents except possibly the last.
//! Once the cursor is exhausted the streamer keeps returning `None`.

use crate::error::{ReplicationError, Result};
use crate::store::DocumentStream;
use bson::Document;
use futures::StreamExt;
use tracing::trace;

/// One window of documents, in cursor order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBatch {
    documents: Vec<Document>,
}

impl DocumentBatch {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Hand the documents to a writer.
    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }
}

/// Counters for one streamer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Batches handed out.
    pub batches: u64,
    /// Documents handed out across all batches.
    pub documents: u64,
}

/// Pulls documents from a stream and hands them out in bounded batches.
pub struct BatchStreamer {
    stream: DocumentStream,
    batch_size: usize,
    buffer: Vec<Document>,
    exhausted: bool,
    stats: StreamStats,
}

impl BatchStreamer {
    /// Create a streamer. A `batch_size` of 0 is treated as 1.
    pub fn new(stream: DocumentStream, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            stream,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            exhausted: false,
            stats: StreamStats::default(),
        }
    }

    /// Build a streamer over documents already in memory.
    pub fn from_documents(documents: Vec<Document>, batch_size: usize) -> Self {
        let stream: DocumentStream = Box::pin(futures::stream::iter(documents.into_iter().map(Ok)));
        Self::new(stream, batch_size)
    }

    /// Next window, or `None` when the cursor is exhausted.
    ///
    /// A cursor error is returned as-is; documents already handed out are
    /// unaffected and the streamer stops producing batches.
    pub async fn next_batch(&mut self) -> Result<Option<DocumentBatch>> {
        if self.exhausted {
            return Ok(None);
        }

        while self.buffer.len() < self.batch_size {
            match self.stream.next().await {
                Some(Ok(document)) => self.buffer.push(document),
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.buffer.clear();
                    return Err(ReplicationError::store("cursor", e));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let documents = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        self.stats.batches += 1;
        self.stats.documents += documents.len() as u64;
        trace!(batch = self.stats.batches, documents = documents.len(), "Batch ready");
        Ok(Some(DocumentBatch::new(documents)))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Counters so far.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use bson::doc;

    fn docs(n: i32) -> Vec<Document> {
        (0..n).map(|i| doc! { "_id": i }).collect()
    }

    async fn drain(streamer: &mut BatchStreamer) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = streamer.next_batch().await.unwrap() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_three_documents_batch_two() {
        let mut streamer = BatchStreamer::from_documents(docs(3), 2);
        assert_eq!(drain(&mut streamer).await, vec![2, 1]);
        assert_eq!(streamer.stats(), StreamStats { batches: 2, documents: 3 });
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_batch() {
        let mut streamer = BatchStreamer::from_documents(docs(4), 2);
        assert_eq!(drain(&mut streamer).await, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut streamer = BatchStreamer::from_documents(Vec::new(), 10);
        assert!(streamer.next_batch().await.unwrap().is_none());
        assert_eq!(streamer.stats().batches, 0);
    }

    #[tokio::test]
    async fn test_exhausted_stays_exhausted() {
        let mut streamer = BatchStreamer::from_documents(docs(1), 5);
        assert!(streamer.next_batch().await.unwrap().is_some());
        assert!(streamer.next_batch().await.unwrap().is_none());
        assert!(streamer.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_order_preserved() {
        let mut streamer = BatchStreamer::from_documents(docs(5), 2);
        let mut ids = Vec::new();
        while let Some(batch) = streamer.next_batch().await.unwrap() {
            ids.extend(batch.into_documents().into_iter().map(|d| d.get_i32("_id").unwrap()));
        }
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cursor_error_surfaces_after_earlier_batches() {
        let items = vec![
            Ok(doc! { "_id": 1 }),
            Ok(doc! { "_id": 2 }),
            Ok(doc! { "_id": 3 }),
            Err(StoreError::Backend("cursor killed".into())),
        ];
        let stream: DocumentStream = Box::pin(futures::stream::iter(items));
        let mut streamer = BatchStreamer::new(stream, 2);

        assert_eq!(streamer.next_batch().await.unwrap().map(|b| b.len()), Some(2));
        let err = streamer.next_batch().await.unwrap_err();
        assert!(err.to_string().contains("cursor killed"));
        assert!(streamer.next_batch().await.unwrap().is_none());
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let streamer = BatchStreamer::from_documents(Vec::new(), 0);
        assert_eq!(streamer.batch_size(), 1);
    }
}
