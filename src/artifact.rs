// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! JSON snapshot artifacts for export and import runs.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── orders.json            # JSON array of documents (canonical Extended JSON)
//! ├── orders.indexes.json    # JSON array of index specs
//! └── customers.json
//! ```
//!
//! Data files are written through an [`ArtifactWriter`] one batch at a time
//! into `<name>.json.tmp` and renamed into place on [`ArtifactWriter::finish`],
//! so an interrupted export never leaves a truncated `<name>.json` behind.

use crate::batch::DocumentBatch;
use crate::error::{ReplicationError, Result};
use crate::indexes::IndexDefinition;
use bson::{Bson, Document};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

const DATA_SUFFIX: &str = ".json";
const INDEX_SUFFIX: &str = ".indexes.json";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory of collection snapshots.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a collection's data file.
    pub fn data_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}{DATA_SUFFIX}"))
    }

    /// Path of a collection's index file.
    pub fn index_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}{INDEX_SUFFIX}"))
    }

    /// Start writing a collection's data file (creates the directory).
    pub async fn writer(&self, collection: &str) -> Result<ArtifactWriter> {
        tokio::fs::create_dir_all(&self.dir).await?;
        ArtifactWriter::create(self.data_path(collection)).await
    }

    /// Write a collection's index definitions.
    pub async fn write_indexes(&self, collection: &str, definitions: &[IndexDefinition]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let specs: Vec<serde_json::Value> = definitions
            .iter()
            .map(|d| Bson::Document(d.to_spec()).into_canonical_extjson())
            .collect();
        let path = self.index_path(collection);
        let body = serde_json::to_vec_pretty(&specs).map_err(|e| ReplicationError::artifact(&path, e.to_string()))?;
        tokio::fs::write(&path, body).await?;
        debug!(collection = %collection, indexes = definitions.len(), "Index artifact written");
        Ok(())
    }

    /// Read a collection's documents. `Ok(None)` when the file does not exist.
    pub async fn read_documents(&self, collection: &str) -> Result<Option<Vec<Document>>> {
        let path = self.data_path(collection);
        match read_json_array(&path).await? {
            Some(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, value)| to_document(&path, i, value))
                .collect::<Result<Vec<_>>>()
                .map(Some),
            None => Ok(None),
        }
    }

    /// Read a collection's index definitions. A missing file means no indexes.
    pub async fn read_indexes(&self, collection: &str) -> Result<Vec<IndexDefinition>> {
        let path = self.index_path(collection);
        let Some(values) = read_json_array(&path).await? else {
            return Ok(Vec::new());
        };
        let mut definitions = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            let spec = to_document(&path, i, value)?;
            if let Some(definition) = IndexDefinition::from_spec(&spec) {
                definitions.push(definition);
            }
        }
        Ok(definitions)
    }

    /// Collections with a data file, sorted by name.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if file_name.ends_with(INDEX_SUFFIX) {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(DATA_SUFFIX) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Streams one collection into a JSON array file.
pub struct ArtifactWriter {
    path: PathBuf,
    temp_path: PathBuf,
    out: BufWriter<tokio::fs::File>,
    written: u64,
}

impl ArtifactWriter {
    async fn create(path: PathBuf) -> Result<Self> {
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp);

        let file = tokio::fs::File::create(&temp_path).await?;
        let mut out = BufWriter::new(file);
        out.write_all(b"[").await?;
        Ok(Self {
            path,
            temp_path,
            out,
            written: 0,
        })
    }

    /// Append a batch of documents.
    pub async fn write_batch(&mut self, batch: &DocumentBatch) -> Result<()> {
        for document in batch.documents() {
            let value = Bson::Document(document.clone()).into_canonical_extjson();
            let encoded = serde_json::to_vec(&value)
                .map_err(|e| ReplicationError::artifact(&self.path, e.to_string()))?;
            let separator: &[u8] = if self.written == 0 { b"\n" } else { b",\n" };
            self.out.write_all(separator).await?;
            self.out.write_all(&encoded).await?;
            self.written += 1;
        }
        Ok(())
    }

    /// Documents written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Close the array and move the file into place.
    pub async fn finish(mut self) -> Result<u64> {
        let closing: &[u8] = if self.written == 0 { b"]\n" } else { b"\n]\n" };
        self.out.write_all(closing).await?;
        self.out.flush().await?;
        self.out.get_mut().sync_all().await?;
        tokio::fs::rename(&self.temp_path, &self.path).await?;
        debug!(path = %self.path.display(), documents = self.written, "Artifact written");
        Ok(self.written)
    }
}

async fn read_json_array(path: &Path) -> Result<Option<Vec<serde_json::Value>>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Array(values)) => Ok(Some(values)),
        Ok(_) => Err(ReplicationError::artifact(path, "expected a JSON array")),
        Err(e) => Err(ReplicationError::artifact(path, format!("invalid JSON: {e}"))),
    }
}

fn to_document(path: &Path, index: usize, value: serde_json::Value) -> Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(ReplicationError::artifact(
            path,
            format!("element {index} is {:?}, expected a document", other.element_type()),
        )),
        Err(e) => Err(ReplicationError::artifact(path, format!("element {index}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[tokio::test]
    async fn test_write_then_read_preserves_types() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("snap"));
        let oid = ObjectId::new();
        let when = bson::DateTime::from_millis(1_767_225_600_000);
        let documents = vec![
            doc! { "_id": oid, "at": when, "n": 1_i64 },
            doc! { "_id": 2, "nested": { "tags": ["a", "b"] } },
        ];

        let mut writer = store.writer("orders").await.unwrap();
        writer.write_batch(&DocumentBatch::new(documents[..1].to_vec())).await.unwrap();
        writer.write_batch(&DocumentBatch::new(documents[1..].to_vec())).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 2);

        let read = store.read_documents("orders").await.unwrap().unwrap();
        assert_eq!(read[0].get_object_id("_id").unwrap(), oid);
        assert_eq!(read[0].get_datetime("at").unwrap(), &when);
        assert_eq!(read[0].get_i64("n").unwrap(), 1);
        assert_eq!(read[0], documents[0]);
        assert_eq!(read[1], documents[1]);
    }

    #[tokio::test]
    async fn test_empty_export_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.writer("empty").await.unwrap().finish().await.unwrap();

        let text = std::fs::read_to_string(store.data_path("empty")).unwrap();
        assert_eq!(text.trim(), "[]");
        assert_eq!(store.read_documents("empty").await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_unfinished_writer_leaves_no_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut writer = store.writer("c").await.unwrap();
        writer.write_batch(&DocumentBatch::new(vec![doc! { "_id": 1 }])).await.unwrap();
        drop(writer);

        assert!(store.read_documents("c").await.unwrap().is_none());
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.read_documents("nope").await.unwrap().is_none());
        assert!(store.read_indexes("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        std::fs::write(store.data_path("broken"), "[{\"_id\": 1,").unwrap();
        let err = store.read_documents("broken").await.unwrap_err();
        assert!(matches!(err, ReplicationError::Artifact { .. }));

        std::fs::write(store.data_path("object"), "{\"_id\": 1}").unwrap();
        let err = store.read_documents("object").await.unwrap_err();
        assert!(err.to_string().contains("expected a JSON array"));

        std::fs::write(store.data_path("scalars"), "[1, 2]").unwrap();
        let err = store.read_documents("scalars").await.unwrap_err();
        assert!(err.to_string().contains("element 0"));
    }

    #[tokio::test]
    async fn test_index_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let definitions = vec![IndexDefinition::from_spec(
            &doc! { "v": 2, "key": { "email": 1 }, "name": "email_1", "unique": true },
        )
        .unwrap()];

        store.write_indexes("users", &definitions).await.unwrap();
        assert_eq!(store.read_indexes("users").await.unwrap(), definitions);
    }

    #[tokio::test]
    async fn test_list_collections_sorted_without_index_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for name in ["zeta.json", "alpha.json", "alpha.indexes.json", "notes.txt", "beta.json.tmp"] {
            std::fs::write(dir.path().join(name), "[]").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.json")).unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let store = ArtifactStore::new("/nonexistent/replicator/snapshots");
        assert!(store.list_collections().await.unwrap().is_empty());
    }
}
