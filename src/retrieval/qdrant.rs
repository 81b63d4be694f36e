//! Qdrant REST client

use super::store::{Point, PointPayload, ScoredPoint, UrlFilter, VectorStore, VectorStoreError};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Qdrant connection settings
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Vector store backed by the Qdrant HTTP API
pub struct QdrantStore {
    config: QdrantConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<ScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrolledPoint {
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    score_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self {
            config: QdrantConfig {
                url: config.url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }

    /// Qdrant filter matching any of the given source URLs (pure function)
    pub fn url_filter_body(filter: UrlFilter<'_>) -> Value {
        json!({
            "must": [
                { "key": "source.url", "match": { "any": filter.0 } }
            ]
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.config.url, path));
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Send and check status; 404 maps to a missing collection
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        collection: &str,
    ) -> Result<reqwest::Response, VectorStoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), collection, "Qdrant request failed");
            return Err(VectorStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        collection: &str,
    ) -> Result<T, VectorStoreError> {
        let envelope: QdrantEnvelope<T> = self
            .send(builder, collection)
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::InvalidResponse(e.to_string()))?;
        Ok(envelope.result)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        let result: ExistsResult = self
            .send_json(
                self.request(Method::GET, &format!("/collections/{name}/exists")),
                name,
            )
            .await?;
        Ok(result.exists)
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<(), VectorStoreError> {
        debug!(collection = name, dimensions, "Creating collection");
        let body = json!({ "vectors": { "size": dimensions, "distance": "Cosine" } });
        self.send(
            self.request(Method::PUT, &format!("/collections/{name}"))
                .json(&body),
            name,
        )
        .await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        debug!(collection = name, points = points.len(), "Upserting points");
        self.send(
            self.request(Method::PUT, &format!("/collections/{name}/points?wait=true"))
                .json(&json!({ "points": points })),
            name,
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<UrlFilter<'_>>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            score_threshold,
            filter: filter.map(Self::url_filter_body),
        };
        let hits: Vec<SearchHit> = self
            .send_json(
                self.request(Method::POST, &format!("/collections/{name}/points/search"))
                    .json(&body),
                name,
            )
            .await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                hit.payload.map(|payload| ScoredPoint {
                    payload,
                    score: hit.score,
                })
            })
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        debug!(collection = name, "Deleting collection");
        self.send(
            self.request(Method::DELETE, &format!("/collections/{name}")),
            name,
        )
        .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        name: &str,
        page_size: usize,
    ) -> Result<Vec<PointPayload>, VectorStoreError> {
        let mut payloads = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({ "limit": page_size, "with_payload": true, "with_vector": false });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }
            let page: ScrollResult = self
                .send_json(
                    self.request(Method::POST, &format!("/collections/{name}/points/scroll"))
                        .json(&body),
                    name,
                )
                .await?;

            payloads.extend(page.points.into_iter().filter_map(|p| p.payload));
            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(payloads)
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let result: CollectionList = self
            .send_json(self.request(Method::GET, "/collections"), "*")
            .await?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }
}
