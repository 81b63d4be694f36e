//! Testing utilities and mock implementations
//!
//! Mocks for the chat model, embedder, vector store, web search and image
//! API, so turns can be exercised without network access.

pub mod mocks;

pub use mocks::*;
