//! LLM provider abstraction layer
//!
//! This module provides a provider-agnostic interface for chat completions
//! (blocking and streaming) and for text embeddings.

pub mod embedding;
pub mod provider;
pub mod providers;

pub use embedding::*;
pub use provider::*;
pub use providers::*;
