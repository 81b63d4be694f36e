//! Vector store contract and point types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a chunk came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub chunk_index: usize,
}

impl SourceMeta {
    /// File name if known, otherwise the URL
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(&self.url)
    }
}

/// Payload stored with every point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub text: String,
    pub source: SourceMeta,
    /// Unix seconds at ingestion; points written by other tools may lack it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Point to upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub payload: PointPayload,
    pub score: f32,
}

/// Restrict search to chunks whose `source.url` is one of these
#[derive(Debug, Clone, Copy)]
pub struct UrlFilter<'a>(pub &'a [String]);

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Vector store connection failed: {0}")]
    Connection(String),
    #[error("Vector store returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid vector store response: {0}")]
    InvalidResponse(String),
}

/// Minimal vector database surface used by retrieval and the TTL sweep
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError>;

    /// Create a cosine-distance collection with vectors of `dimensions`
    async fn create_collection(&self, name: &str, dimensions: usize)
        -> Result<(), VectorStoreError>;

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<UrlFilter<'_>>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError>;

    /// Payloads of every point, fetched `page_size` points at a time
    async fn scroll(
        &self,
        name: &str,
        page_size: usize,
    ) -> Result<Vec<PointPayload>, VectorStoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;
}
