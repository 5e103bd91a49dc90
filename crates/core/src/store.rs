use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{Chunk, CollectionInfo, DocumentRecord, EmbeddingRecord, ScoredChunk, SearchError};
use std::sync::Arc;
use tracing::{debug, info};

/// Most similar first; equal distances keep document order.
pub fn rank(hits: &mut [ScoredChunk]) {
    hits.sort_by(|left, right| {
        left.distance
            .total_cmp(&right.distance)
            .then_with(|| left.chunk.sequence.cmp(&right.chunk.sequence))
    });
}

#[derive(Clone)]
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        Self {
            embedder,
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn index(
        &self,
        document: &DocumentRecord,
        chunks: &[Chunk],
    ) -> Result<usize, SearchError> {
        let mut records = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(SearchError::EmbeddingService {
                    provider: self.embedder.provider().to_string(),
                    details: format!(
                        "returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }
            records.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddingRecord { chunk, vector }),
            );
            debug!(embedded = records.len(), total = chunks.len(), "embedding progress");
        }

        self.index
            .write_collection(&document.document_id, document, &records)
            .await?;

        info!(
            document_id = %document.document_id,
            backend = self.index.backend(),
            records = records.len(),
            "indexed document"
        );
        Ok(records.len())
    }

    pub async fn query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        self.index.collection_info(collection).await?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::EmbeddingService {
                provider: self.embedder.provider().to_string(),
                details: "no vector returned for query".to_string(),
            })?;

        let mut hits: Vec<ScoredChunk> = self
            .index
            .search(collection, &query_vector, k)
            .await?
            .into_iter()
            .filter(|hit| hit.chunk.document_id == collection)
            .collect();
        rank(&mut hits);
        hits.truncate(k);

        debug!(collection, k, hits = hits.len(), "query complete");
        Ok(hits)
    }

    pub async fn collection_info(&self, collection: &str) -> Result<CollectionInfo, SearchError> {
        self.index.collection_info(collection).await
    }

    pub async fn delete(&self, collection: &str) -> Result<bool, SearchError> {
        self.index.delete_collection(collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::LocalVectorStore;
    use crate::DocumentFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tempfile::tempdir;

    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn provider(&self) -> &str {
            "counting"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.embed_batch(texts).await
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn provider(&self) -> &str {
            "short"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            Ok(vec![vec![1.0]])
        }
    }

    fn document(id: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: id.to_string(),
            filename: "paper.txt".to_string(),
            byte_size: 0,
            format: DocumentFormat::Text,
            checksum: String::new(),
            uploaded_at: chrono::Utc::now(),
        }
    }

    fn chunk(document_id: &str, sequence: u64, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{document_id}-{sequence}"),
            document_id: document_id.to_string(),
            source: "paper.txt".to_string(),
            page: None,
            sequence,
            char_start: 0,
            char_end: text.chars().count(),
            overlap: 0,
            text: text.to_string(),
        }
    }

    fn scored(sequence: u64, distance: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: chunk("doc", sequence, "x"),
            score: 1.0 - distance,
            distance,
        }
    }

    #[test]
    fn rank_breaks_ties_by_sequence() {
        let mut hits = vec![scored(5, 0.2), scored(1, 0.4), scored(3, 0.2)];
        rank(&mut hits);
        let order: Vec<u64> = hits.iter().map(|hit| hit.chunk.sequence).collect();
        assert_eq!(order, vec![3, 5, 1]);
    }

    #[tokio::test]
    async fn query_is_scoped_to_one_collection_and_bounded_by_k(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = Arc::new(CountingEmbedder {
            inner: CharacterNgramEmbedder::default(),
            calls: AtomicUsize::new(0),
        });
        let store = VectorStore::new(embedder.clone(), Arc::new(LocalVectorStore::new(dir.path())), 2);

        let first: Vec<Chunk> = (0..5)
            .map(|index| chunk("first", index, &format!("neural sentiment model part {index}")))
            .collect();
        let second = vec![chunk("second", 0, "neural sentiment model part 0")];

        assert_eq!(store.index(&document("first"), &first).await?, 5);
        store.index(&document("second"), &second).await?;
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 4);

        let hits = store.query("first", "neural sentiment model", 3).await?;
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|hit| hit.chunk.document_id == "first"));
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        Ok(())
    }

    #[tokio::test]
    async fn query_before_index_is_index_not_found() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(CountingEmbedder {
            inner: CharacterNgramEmbedder::default(),
            calls: AtomicUsize::new(0),
        });
        let store = VectorStore::new(embedder.clone(), Arc::new(LocalVectorStore::new(dir.path())), 8);

        let result = store.query("never-indexed", "anything", 3).await;
        assert!(matches!(result, Err(SearchError::IndexNotFound(_))));
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_embedding_batch_is_an_embedding_error() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(
            Arc::new(ShortEmbedder),
            Arc::new(LocalVectorStore::new(dir.path())),
            8,
        );
        let chunks = vec![chunk("doc", 0, "a"), chunk("doc", 1, "b")];

        let result = store.index(&document("doc"), &chunks).await;
        assert!(matches!(result, Err(SearchError::EmbeddingService { .. })));
        assert!(matches!(
            store.collection_info("doc").await,
            Err(SearchError::IndexNotFound(_))
        ));
    }
}
