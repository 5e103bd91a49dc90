use crate::{CollectionInfo, DocumentRecord, EmbeddingRecord, ScoredChunk, SearchError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &str;

    /// Writes a complete collection. Existing collections are never rewritten.
    async fn write_collection(
        &self,
        collection: &str,
        document: &DocumentRecord,
        records: &[EmbeddingRecord],
    ) -> Result<(), SearchError>;

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_collection(&self, collection: &str) -> Result<bool, SearchError>;

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo, SearchError>;
}
