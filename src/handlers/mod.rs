//! Handler nodes
//!
//! Four interchangeable turn processors share the [`Handler`] contract:
//! read the turn state, do their external calls, and return a
//! [`HandlerOutcome`]. Failures are values, not panics or propagated errors:
//! a [`HandlerFailure`] carries the apology text shown to the learner, so the
//! orchestrator always has a response to fold into the plan results.
//!
//! Handlers never touch `tasks` or `task_index`; routing belongs to the
//! orchestrator.

pub mod image;
pub mod prompts;
pub mod rag;
pub mod simple;
pub mod stream;
pub mod web_search;

pub use image::ImageHandler;
pub use rag::RagHandler;
pub use simple::SimpleAnswerHandler;
pub use stream::{stream_answer, ChunkSink, TurnEvent};
pub use web_search::WebSearchHandler;

use crate::error::sanitize_error_message;
use crate::llm::provider::{CompletionRequest, LlmProvider, Message, TokenUsage};
use crate::routing::HandlerKind;
use crate::session::{IntermediateResult, TurnState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Successful handler result
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub text: String,
    pub usage: TokenUsage,
    /// Image produced by this step, appended to the session image list
    pub image_url: Option<String>,
}

impl HandlerOutput {
    pub fn text(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
            image_url: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            text: format!("![image]({url})"),
            usage: TokenUsage::default(),
            image_url: Some(url),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Absorbed handler failure with the learner-facing message
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub message: String,
    /// Tokens spent before the failure
    pub usage: TokenUsage,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            usage: TokenUsage::default(),
        }
    }

    /// `"{apology} Error: {sanitized error}"`
    pub fn from_error(apology: &str, error: &dyn std::fmt::Display) -> Self {
        Self::new(format!(
            "{apology} Error: {}",
            sanitize_error_message(&error.to_string())
        ))
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

pub type HandlerOutcome = Result<HandlerOutput, HandlerFailure>;

/// Turn processor contract
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    async fn handle(&self, state: &TurnState, sink: &ChunkSink) -> HandlerOutcome;
}

/// How step results are combined once a plan completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Every result under a `### handler` header; a lone result verbatim
    Concatenate,
    /// Only the last step's output
    LastResult,
}

impl MergeStrategy {
    pub fn merge(&self, results: &[IntermediateResult]) -> Option<String> {
        match (self, results) {
            (_, []) => None,
            (_, [only]) => Some(only.output.clone()),
            (MergeStrategy::LastResult, [.., last]) => Some(last.output.clone()),
            (MergeStrategy::Concatenate, all) => Some(
                all.iter()
                    .map(|r| format!("### {}\n{}", r.handler.display_name(), r.output))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
        }
    }
}

/// Chat model settings shared by the answering handlers
#[derive(Clone)]
pub struct ChatModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatModel {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest::new(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Lookup table from handler kind to implementation
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<HandlerKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(handler: HandlerKind, output: &str) -> IntermediateResult {
        IntermediateResult {
            handler,
            query: "q".to_string(),
            output: output.to_string(),
        }
    }

    #[test]
    fn test_merge_empty() {
        assert_eq!(MergeStrategy::Concatenate.merge(&[]), None);
        assert_eq!(MergeStrategy::LastResult.merge(&[]), None);
    }

    #[test]
    fn test_merge_single_result_is_verbatim() {
        let results = [result(HandlerKind::Rag, "only answer")];
        assert_eq!(
            MergeStrategy::Concatenate.merge(&results).as_deref(),
            Some("only answer")
        );
        assert_eq!(
            MergeStrategy::LastResult.merge(&results).as_deref(),
            Some("only answer")
        );
    }

    #[test]
    fn test_merge_concatenate_adds_headers() {
        let results = [
            result(HandlerKind::WebSearch, "news"),
            result(HandlerKind::Image, "![image](u)"),
        ];
        let merged = MergeStrategy::Concatenate.merge(&results).unwrap();
        assert_eq!(merged, "### WebSearch\nnews\n\n### Image\n![image](u)");
    }

    #[test]
    fn test_merge_last_result() {
        let results = [
            result(HandlerKind::WebSearch, "news"),
            result(HandlerKind::SimpleLlm, "summary"),
        ];
        assert_eq!(
            MergeStrategy::LastResult.merge(&results).as_deref(),
            Some("summary")
        );
    }

    #[test]
    fn test_failure_from_error_is_sanitized() {
        let failure = HandlerFailure::from_error(
            "Sorry, I couldn't process the image.",
            &"upstream said token=abc123",
        );
        assert!(failure
            .message
            .starts_with("Sorry, I couldn't process the image. Error: "));
        assert!(!failure.message.contains("abc123"));
    }

    #[test]
    fn test_image_output_embeds_url() {
        let output = HandlerOutput::image("http://x/cat.png");
        assert_eq!(output.image_url.as_deref(), Some("http://x/cat.png"));
        assert_eq!(output.text, "![image](http://x/cat.png)");
    }
}
