use crate::traits::VectorIndex;
use crate::{Chunk, CollectionInfo, DocumentRecord, EmbeddingRecord, ScoredChunk, SearchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let endpoint: String = endpoint.into();
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, SearchError> {
        let response = self.client.get(self.collection_url(collection)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(backend_error(status)),
        }
    }

    async fn drop_partial(&self, collection: &str) {
        if let Err(error) = self.delete_collection(collection).await {
            warn!(collection, %error, "failed to drop partial collection");
        }
    }

    async fn upsert_points(
        &self,
        collection: &str,
        document: &DocumentRecord,
        records: &[EmbeddingRecord],
    ) -> Result<(), SearchError> {
        let points = records
            .iter()
            .map(|record| {
                Ok(json!({
                    "id": record.chunk.sequence,
                    "vector": record.vector,
                    "payload": {
                        "chunk": serde_json::to_value(&record.chunk)?,
                        "document": serde_json::to_value(document)?,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/points?wait=true",
                self.collection_url(collection)
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

// Deletes a half-written collection if `write_collection` is dropped before
// it finishes. Error paths clean up inline and disarm the guard.
struct PendingCollection {
    client: Client,
    url: String,
    armed: bool,
}

impl PendingCollection {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingCollection {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(url = %self.url, "no runtime to drop abandoned collection");
            return;
        };
        let client = self.client.clone();
        let url = std::mem::take(&mut self.url);
        runtime.spawn(async move {
            match client.delete(&url).send().await {
                Ok(response) => info!(%url, status = %response.status(), "dropped abandoned collection"),
                Err(error) => warn!(%url, %error, "failed to drop abandoned collection"),
            }
        });
    }
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn parse_hit(hit: &Value) -> Result<ScoredChunk, SearchError> {
    let chunk_value = hit
        .pointer("/payload/chunk")
        .cloned()
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "point payload has no chunk".to_string(),
        })?;
    let chunk: Chunk = serde_json::from_value(chunk_value)?;
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    Ok(ScoredChunk {
        chunk,
        score,
        distance: 1.0 - score,
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn write_collection(
        &self,
        collection: &str,
        document: &DocumentRecord,
        records: &[EmbeddingRecord],
    ) -> Result<(), SearchError> {
        if self.collection_exists(collection).await? {
            return Err(SearchError::CollectionExists(collection.to_string()));
        }

        let vector_size = records.first().map(|record| record.vector.len()).unwrap_or(1);
        if let Some(bad) = records.iter().find(|record| record.vector.len() != vector_size) {
            return Err(SearchError::Request(format!(
                "embedding dimension {} != {}",
                bad.vector.len(),
                vector_size
            )));
        }

        let mut pending = PendingCollection {
            client: self.client.clone(),
            url: self.collection_url(collection),
            armed: true,
        };
        let created = self
            .client
            .put(self.collection_url(collection))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" },
            }))
            .send()
            .await;
        let status = match created {
            Ok(response) => response.status(),
            Err(error) => {
                pending.disarm();
                self.drop_partial(collection).await;
                return Err(error.into());
            }
        };
        if !status.is_success() {
            pending.disarm();
            return Err(backend_error(status));
        }

        if !records.is_empty() {
            if let Err(error) = self.upsert_points(collection, document, records).await {
                warn!(collection, %error, "upsert failed, dropping partial collection");
                pending.disarm();
                self.drop_partial(collection).await;
                return Err(error);
            }
        }

        pending.disarm();
        info!(collection, points = records.len(), "wrote qdrant collection");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SearchError::IndexNotFound(collection.to_string())),
            status if !status.is_success() => return Err(backend_error(status)),
            _ => {}
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = hits.iter().map(parse_hit).collect::<Result<Vec<_>, _>>()?;
        crate::store::rank(&mut result);
        result.truncate(top_k);
        Ok(result)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, SearchError> {
        let response = self
            .client
            .delete(self.collection_url(collection))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(backend_error(status)),
        }
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo, SearchError> {
        let response = self.client.get(self.collection_url(collection)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(SearchError::IndexNotFound(collection.to_string())),
            status if !status.is_success() => return Err(backend_error(status)),
            _ => {}
        }
        let parsed: Value = response.json().await?;

        let scroll: Value = self
            .client
            .post(format!("{}/points/scroll", self.collection_url(collection)))
            .json(&json!({ "limit": 1, "with_payload": true }))
            .send()
            .await?
            .json()
            .await?;
        let document = scroll
            .pointer("/result/points/0/payload/document")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok());

        Ok(CollectionInfo {
            collection: collection.to_string(),
            document,
            record_count: parsed
                .pointer("/result/points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            dimensions: parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .map(|size| size as usize),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentFormat;
    use axum::extract::{Path, State};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeQdrant {
        collections: Mutex<HashMap<String, Vec<Value>>>,
        upsert_delay: Option<Duration>,
        fail_upsert: bool,
    }

    type Shared = State<Arc<FakeQdrant>>;
    type Reply = (StatusCode, Json<Value>);

    fn result(body: Value) -> Reply {
        (StatusCode::OK, Json(json!({ "result": body, "status": "ok" })))
    }

    fn missing() -> Reply {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": { "error": "Not found: Collection doesn't exist" } })),
        )
    }

    async fn get_collection(State(fake): Shared, Path(name): Path<String>) -> Reply {
        match fake.collections.lock().unwrap().get(&name) {
            Some(points) => result(json!({
                "points_count": points.len(),
                "config": { "params": { "vectors": { "size": 3, "distance": "Cosine" } } },
            })),
            None => missing(),
        }
    }

    async fn create_collection(State(fake): Shared, Path(name): Path<String>) -> Reply {
        fake.collections.lock().unwrap().entry(name).or_default();
        result(json!(true))
    }

    async fn delete_collection(State(fake): Shared, Path(name): Path<String>) -> Reply {
        match fake.collections.lock().unwrap().remove(&name) {
            Some(_) => result(json!(true)),
            None => missing(),
        }
    }

    async fn upsert(
        State(fake): Shared,
        Path(name): Path<String>,
        Json(body): Json<Value>,
    ) -> Reply {
        if let Some(delay) = fake.upsert_delay {
            tokio::time::sleep(delay).await;
        }
        if fake.fail_upsert {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
        }
        let points = body["points"].as_array().cloned().unwrap_or_default();
        match fake.collections.lock().unwrap().get_mut(&name) {
            Some(stored) => {
                stored.extend(points);
                result(json!({ "status": "completed" }))
            }
            None => missing(),
        }
    }

    async fn search_points(State(fake): Shared, Path(name): Path<String>) -> Reply {
        match fake.collections.lock().unwrap().get(&name) {
            Some(points) => result(Value::Array(
                points
                    .iter()
                    .map(|point| {
                        json!({
                            "id": point.get("id"),
                            "score": 0.5,
                            "payload": point.get("payload"),
                        })
                    })
                    .collect(),
            )),
            None => missing(),
        }
    }

    async fn scroll_points(State(fake): Shared, Path(name): Path<String>) -> Reply {
        match fake.collections.lock().unwrap().get(&name) {
            Some(points) => result(json!({ "points": points.iter().take(1).collect::<Vec<_>>() })),
            None => missing(),
        }
    }

    async fn serve(fake: Arc<FakeQdrant>) -> QdrantStore {
        let router = Router::new()
            .route(
                "/collections/{name}",
                get(get_collection).put(create_collection).delete(delete_collection),
            )
            .route("/collections/{name}/points", put(upsert))
            .route("/collections/{name}/points/search", post(search_points))
            .route("/collections/{name}/points/scroll", post(scroll_points))
            .with_state(fake);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        QdrantStore::new(format!("http://{address}"), Duration::from_secs(5)).unwrap()
    }

    fn document() -> DocumentRecord {
        DocumentRecord {
            document_id: "doc-1".to_string(),
            filename: "paper.txt".to_string(),
            byte_size: 12,
            format: DocumentFormat::Text,
            checksum: "abc".to_string(),
            uploaded_at: Utc::now(),
        }
    }

    fn records() -> Vec<EmbeddingRecord> {
        (0..2u64)
            .map(|sequence| EmbeddingRecord {
                chunk: Chunk {
                    chunk_id: format!("c{sequence}"),
                    document_id: "doc-1".to_string(),
                    source: "paper.txt".to_string(),
                    page: None,
                    sequence,
                    char_start: 0,
                    char_end: 6,
                    overlap: 0,
                    text: format!("part {sequence}"),
                },
                vector: vec![1.0, 0.0, sequence as f32],
            })
            .collect()
    }

    #[tokio::test]
    async fn written_collection_is_searchable_and_described() {
        let fake = Arc::new(FakeQdrant::default());
        let store = serve(fake.clone()).await;

        store.write_collection("doc-1", &document(), &records()).await.unwrap();
        let hits = store.search("doc-1", &[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.sequence, 0);

        let info = store.collection_info("doc-1").await.unwrap();
        assert_eq!(info.record_count, 2);
        assert_eq!(info.dimensions, Some(3));
        assert_eq!(info.document.map(|doc| doc.filename), Some("paper.txt".to_string()));

        assert!(matches!(
            store.write_collection("doc-1", &document(), &records()).await,
            Err(SearchError::CollectionExists(_))
        ));
    }

    #[tokio::test]
    async fn missing_collection_is_index_not_found() {
        let store = serve(Arc::new(FakeQdrant::default())).await;

        assert!(matches!(
            store.search("nope", &[1.0, 0.0, 0.0], 3).await,
            Err(SearchError::IndexNotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            store.collection_info("nope").await,
            Err(SearchError::IndexNotFound(_))
        ));
        assert!(!store.delete_collection("nope").await.unwrap());
    }

    #[tokio::test]
    async fn failed_upsert_drops_the_partial_collection() {
        let fake = Arc::new(FakeQdrant {
            fail_upsert: true,
            ..Default::default()
        });
        let store = serve(fake.clone()).await;

        assert!(matches!(
            store.write_collection("doc-1", &document(), &records()).await,
            Err(SearchError::BackendResponse { .. })
        ));
        assert!(fake.collections.lock().unwrap().is_empty());
        assert!(matches!(
            store.search("doc-1", &[1.0, 0.0, 0.0], 3).await,
            Err(SearchError::IndexNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_write_drops_the_partial_collection() {
        let fake = Arc::new(FakeQdrant {
            upsert_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let store = Arc::new(serve(fake.clone()).await);

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.write_collection("doc-1", &document(), &records()).await })
        };
        for _ in 0..200 {
            if fake.collections.lock().unwrap().contains_key("doc-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fake.collections.lock().unwrap().contains_key("doc-1"));

        writer.abort();
        let _ = writer.await;
        for _ in 0..200 {
            if !fake.collections.lock().unwrap().contains_key("doc-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(
            store.collection_info("doc-1").await,
            Err(SearchError::IndexNotFound(_))
        ));
    }

    #[test]
    fn hit_payload_becomes_scored_chunk() {
        let hit = json!({
            "id": 4,
            "score": 0.75,
            "payload": {
                "chunk": {
                    "chunk_id": "abc",
                    "document_id": "doc",
                    "source": "paper.pdf",
                    "page": 2,
                    "sequence": 4,
                    "char_start": 100,
                    "char_end": 200,
                    "overlap": 20,
                    "text": "results"
                }
            }
        });

        let scored = parse_hit(&hit).unwrap();
        assert_eq!(scored.chunk.sequence, 4);
        assert_eq!(scored.chunk.page, Some(2));
        assert!((scored.distance - 0.25).abs() < 1e-9);
    }

    #[test]
    fn hit_without_chunk_is_rejected() {
        let hit = json!({ "id": 1, "score": 0.5, "payload": {} });
        assert!(matches!(
            parse_hit(&hit),
            Err(SearchError::BackendResponse { .. })
        ));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let store = QdrantStore::new("http://localhost:6333/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.collection_url("doc"),
            "http://localhost:6333/collections/doc"
        );
    }
}
