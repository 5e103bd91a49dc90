//! File-backed vector index.
//!
//! Each collection lives in `<root>/<collection>/collection.json` and is
//! written once through a temporary file plus rename, so readers never see a
//! half-written collection. Loaded collections are cached in memory.

use crate::traits::VectorIndex;
use crate::{CollectionInfo, DocumentRecord, EmbeddingRecord, ScoredChunk, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const COLLECTION_FILE: &str = "collection.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCollection {
    document: DocumentRecord,
    dimensions: usize,
    records: Vec<EmbeddingRecord>,
}

#[derive(Debug)]
pub struct LocalVectorStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<StoredCollection>>>,
}

impl LocalVectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, SearchError> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(SearchError::Request(format!(
                "invalid collection name {collection:?}"
            )));
        }
        Ok(self.root.join(collection))
    }

    async fn load(&self, collection: &str) -> Result<Arc<StoredCollection>, SearchError> {
        if let Some(cached) = self.cache.read().await.get(collection) {
            return Ok(Arc::clone(cached));
        }

        let path = self.collection_dir(collection)?.join(COLLECTION_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(SearchError::IndexNotFound(collection.to_string()));
            }
            Err(error) => return Err(error.into()),
        };

        let stored: Arc<StoredCollection> = Arc::new(serde_json::from_slice(&bytes)?);
        debug!(collection, records = stored.records.len(), "loaded collection from disk");
        self.cache
            .write()
            .await
            .insert(collection.to_string(), Arc::clone(&stored));
        Ok(stored)
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn write_collection(
        &self,
        collection: &str,
        document: &DocumentRecord,
        records: &[EmbeddingRecord],
    ) -> Result<(), SearchError> {
        let dir = self.collection_dir(collection)?;
        let target = dir.join(COLLECTION_FILE);
        if tokio::fs::try_exists(&target).await? {
            return Err(SearchError::CollectionExists(collection.to_string()));
        }

        let dimensions = records.first().map(|record| record.vector.len()).unwrap_or(0);
        if let Some(bad) = records.iter().find(|record| record.vector.len() != dimensions) {
            return Err(SearchError::Request(format!(
                "record {} has {} dimensions, expected {dimensions}",
                bad.chunk.sequence,
                bad.vector.len()
            )));
        }

        let stored = StoredCollection {
            document: document.clone(),
            dimensions,
            records: records.to_vec(),
        };
        let payload = serde_json::to_vec(&stored)?;

        tokio::fs::create_dir_all(&dir).await?;
        let staging = dir.join(format!("{COLLECTION_FILE}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, payload).await?;
        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }

        info!(collection, records = records.len(), dimensions, "wrote collection");
        self.cache
            .write()
            .await
            .insert(collection.to_string(), Arc::new(stored));
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let stored = self.load(collection).await?;
        if stored.dimensions != 0 && stored.dimensions != query_vector.len() {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                stored.dimensions
            )));
        }

        let mut scored: Vec<ScoredChunk> = stored
            .records
            .iter()
            .map(|record| {
                let score = cosine_similarity(&record.vector, query_vector);
                ScoredChunk {
                    chunk: record.chunk.clone(),
                    score,
                    distance: 1.0 - score,
                }
            })
            .collect();

        crate::store::rank(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, SearchError> {
        let dir = self.collection_dir(collection)?;
        self.cache.write().await.remove(collection);

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(collection, "deleted collection");
                Ok(true)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo, SearchError> {
        let stored = self.load(collection).await?;
        Ok(CollectionInfo {
            collection: collection.to_string(),
            document: Some(stored.document.clone()),
            record_count: stored.records.len() as u64,
            dimensions: Some(stored.dimensions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, DocumentFormat};
    use tempfile::tempdir;

    fn document(id: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: id.to_string(),
            filename: format!("{id}.txt"),
            byte_size: 10,
            format: DocumentFormat::Text,
            checksum: "sum".to_string(),
            uploaded_at: chrono::Utc::now(),
        }
    }

    fn record(document_id: &str, sequence: u64, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: Chunk {
                chunk_id: format!("{document_id}-{sequence}"),
                document_id: document_id.to_string(),
                source: format!("{document_id}.txt"),
                page: None,
                sequence,
                char_start: 0,
                char_end: 1,
                overlap: 0,
                text: format!("chunk {sequence}"),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn search_orders_by_distance_then_sequence() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::new(dir.path());
        let records = vec![
            record("doc", 0, vec![0.0, 1.0]),
            record("doc", 1, vec![1.0, 0.0]),
            record("doc", 2, vec![2.0, 0.0]),
            record("doc", 3, vec![1.0, 1.0]),
        ];
        store.write_collection("doc", &document("doc"), &records).await?;

        let hits = store.search("doc", &[1.0, 0.0], 3).await?;
        let order: Vec<u64> = hits.iter().map(|hit| hit.chunk.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[0].distance.abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn collections_survive_a_new_store_instance() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        LocalVectorStore::new(dir.path())
            .write_collection("doc", &document("doc"), &[record("doc", 0, vec![1.0])])
            .await?;

        let reopened = LocalVectorStore::new(dir.path());
        let info = reopened.collection_info("doc").await?;
        assert_eq!(info.record_count, 1);
        assert_eq!(info.document.map(|doc| doc.filename), Some("doc.txt".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_collection_is_index_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        assert!(matches!(
            store.search("nothing", &[1.0], 1).await,
            Err(SearchError::IndexNotFound(name)) if name == "nothing"
        ));
    }

    #[tokio::test]
    async fn collections_are_write_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::new(dir.path());
        let records = [record("doc", 0, vec![1.0])];
        store.write_collection("doc", &document("doc"), &records).await?;

        let second = store.write_collection("doc", &document("doc"), &records).await;
        assert!(matches!(second, Err(SearchError::CollectionExists(_))));
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_collection_and_cache() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::new(dir.path());
        store
            .write_collection("doc", &document("doc"), &[record("doc", 0, vec![1.0])])
            .await?;

        assert!(store.delete_collection("doc").await?);
        assert!(!store.delete_collection("doc").await?);
        assert!(matches!(
            store.collection_info("doc").await,
            Err(SearchError::IndexNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn path_like_collection_names_are_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        assert!(matches!(
            store.collection_info("../escape").await,
            Err(SearchError::Request(_))
        ));
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
