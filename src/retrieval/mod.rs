//! Retrieval collaborator
//!
//! Wraps the vector database for handlers: document ingestion (chunk, embed
//! in parallel batches, upsert), relaxed similarity search, and the TTL
//! sweep that evicts stale session collections.

pub mod chunking;
pub mod collection;
pub mod qdrant;
pub mod retriever;
pub mod store;
pub mod sweeper;

pub use chunking::split_text;
pub use collection::CollectionKey;
pub use qdrant::{QdrantConfig, QdrantStore};
pub use retriever::{
    EmbeddingBatching, RetrievalQuery, RetrievalStage, RetrievedDocument, Retriever,
    SourceDocument,
};
pub use store::{
    Point, PointPayload, ScoredPoint, SourceMeta, UrlFilter, VectorStore, VectorStoreError,
};
pub use sweeper::{SweepConfig, SweepReport, TtlSweeper};
