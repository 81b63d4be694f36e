//! Error types for the tutor router
//!
//! The routing core absorbs failures into data (fallback plans, apology
//! responses, skipped sweep items). [`TutorError`] covers the fallible
//! surface around it: configuration, client construction, ingestion and the
//! one-shot CLI commands.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for tutor router operations
#[derive(Debug, Error)]
pub enum TutorError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::provider::LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::llm::embedding::EmbeddingError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] crate::retrieval::VectorStoreError),

    #[error("Web search error: {0}")]
    Search(#[from] crate::search::SearchError),

    #[error("Image generation error: {0}")]
    Image(#[from] crate::imaging::ImageError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TutorError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error text safe to show outside the process
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for tutor router operations
pub type TutorResult<T> = Result<T, TutorError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact secrets and sensitive paths, capping the result at 500 bytes
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}
