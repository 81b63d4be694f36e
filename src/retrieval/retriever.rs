//! Document ingestion and relaxed retrieval

use super::chunking::split_text;
use super::collection::CollectionKey;
use super::store::{
    Point, PointPayload, ScoredPoint, SourceMeta, UrlFilter, VectorStore, VectorStoreError,
};
use crate::error::TutorResult;
use crate::llm::embedding::{embed_batched, Embedder};
use crate::observability::metrics::metrics;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Text to ingest, with the URL it was uploaded from
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub url: String,
    pub file_name: Option<String>,
    pub text: String,
}

/// Chunk returned to a handler
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f32,
    pub source: SourceMeta,
}

impl From<ScoredPoint> for RetrievedDocument {
    fn from(point: ScoredPoint) -> Self {
        Self {
            text: point.payload.text,
            score: point.score,
            source: point.payload.source,
        }
    }
}

/// Search parameters for one retrieval
#[derive(Debug, Clone, Copy)]
pub struct RetrievalQuery<'a> {
    pub query: &'a str,
    pub top_k: usize,
    pub score_threshold: f32,
    pub url_filter: Option<&'a [String]>,
}

/// Which rung of the relaxation ladder produced the results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Threshold,
    ZeroThreshold,
    Unfiltered,
}

impl RetrievalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStage::Threshold => "threshold",
            RetrievalStage::ZeroThreshold => "zero_threshold",
            RetrievalStage::Unfiltered => "unfiltered",
        }
    }
}

/// Batch settings for embedding during ingestion
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingBatching {
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl Default for EmbeddingBatching {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_concurrency: 4,
        }
    }
}

/// Vector store wrapper handlers talk to
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    batching: EmbeddingBatching,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            batching: EmbeddingBatching::default(),
        }
    }

    pub fn with_batching(mut self, batching: EmbeddingBatching) -> Self {
        self.batching = batching;
        self
    }

    pub fn store_handle(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    /// Chunk, embed and upsert documents, creating the collection on first
    /// write. Returns the number of stored chunks.
    pub async fn store(
        &self,
        key: &CollectionKey,
        documents: &[SourceDocument],
        chunk_size: usize,
        overlap: usize,
    ) -> TutorResult<usize> {
        let timestamp = Utc::now().timestamp();
        let mut payloads = Vec::new();
        for doc in documents {
            for (chunk_index, text) in split_text(&doc.text, chunk_size, overlap)
                .into_iter()
                .enumerate()
            {
                payloads.push(PointPayload {
                    text,
                    source: SourceMeta {
                        url: doc.url.clone(),
                        file_name: doc.file_name.clone(),
                        chunk_index,
                    },
                    timestamp: Some(timestamp),
                });
            }
        }

        if payloads.is_empty() {
            debug!(collection = %key, "Nothing to ingest");
            return Ok(0);
        }

        let texts: Vec<String> = payloads.iter().map(|p| p.text.clone()).collect();
        let vectors = embed_batched(
            self.embedder.as_ref(),
            &texts,
            self.batching.batch_size,
            self.batching.max_concurrency,
        )
        .await?;

        if !self.store.collection_exists(key.name()).await? {
            self.store
                .create_collection(key.name(), self.embedder.dimensions())
                .await?;
        }

        let points: Vec<Point> = vectors
            .into_iter()
            .zip(payloads)
            .map(|(vector, payload)| Point {
                id: Uuid::new_v4().to_string(),
                vector,
                payload,
            })
            .collect();
        let count = points.len();
        self.store.upsert(key.name(), points).await?;

        info!(collection = %key, chunks = count, documents = documents.len(), "Documents ingested");
        Ok(count)
    }

    /// Ranked chunks for `query`, relaxing the search when nothing matches:
    /// first at the configured threshold, then at 0.0, then at 0.0 without
    /// the URL filter. A missing collection yields no documents.
    pub async fn retrieve(
        &self,
        key: &CollectionKey,
        query: RetrievalQuery<'_>,
    ) -> TutorResult<Vec<RetrievedDocument>> {
        let (documents, stage) = self.retrieve_with_stage(key, query).await?;
        if let Some(stage) = stage {
            if stage != RetrievalStage::Threshold {
                metrics().retrieval_relaxed(stage.as_str());
            }
        }
        Ok(documents)
    }

    /// Retrieval plus the ladder rung that produced the hits, `None` when empty
    pub async fn retrieve_with_stage(
        &self,
        key: &CollectionKey,
        query: RetrievalQuery<'_>,
    ) -> TutorResult<(Vec<RetrievedDocument>, Option<RetrievalStage>)> {
        if !self.store.collection_exists(key.name()).await? {
            debug!(collection = %key, "Collection missing, nothing to retrieve");
            return Ok((Vec::new(), None));
        }

        let vector = self.embedder.embed_query(query.query).await?;
        let filter = query.url_filter.filter(|urls| !urls.is_empty()).map(UrlFilter);

        let hits = self
            .search(key, &vector, filter, query.top_k, query.score_threshold)
            .await?;
        if !hits.is_empty() {
            return Ok((hits, Some(RetrievalStage::Threshold)));
        }

        let hits = self.search(key, &vector, filter, query.top_k, 0.0).await?;
        if !hits.is_empty() {
            debug!(
                collection = %key,
                threshold = query.score_threshold,
                "No hits above threshold, returning relaxed results"
            );
            return Ok((hits, Some(RetrievalStage::ZeroThreshold)));
        }

        if filter.is_none() {
            return Ok((Vec::new(), None));
        }

        let hits = self.search(key, &vector, None, query.top_k, 0.0).await?;
        if hits.is_empty() {
            debug!(collection = %key, "Collection has no matching content");
            Ok((Vec::new(), None))
        } else {
            warn!(
                collection = %key,
                urls = ?query.url_filter,
                "URL filter matched nothing, returning unfiltered results"
            );
            Ok((hits, Some(RetrievalStage::Unfiltered)))
        }
    }

    async fn search(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        filter: Option<UrlFilter<'_>>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, VectorStoreError> {
        match self
            .store
            .search(key.name(), vector, filter, limit, threshold)
            .await
        {
            Ok(points) => Ok(points.into_iter().map(RetrievedDocument::from).collect()),
            Err(VectorStoreError::CollectionNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Delete a session collection; `false` when it did not exist
    pub async fn drop_session(&self, key: &CollectionKey) -> TutorResult<bool> {
        match self.store.delete_collection(key.name()).await {
            Ok(()) => {
                info!(collection = %key, "Session collection dropped");
                Ok(true)
            }
            Err(VectorStoreError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
