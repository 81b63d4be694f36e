//! Closed set of handler identifiers
//!
//! Plans arrive from a language model as free-form strings ("SimpleLLM",
//! "rag", "Web Search", ...). They are parsed into [`HandlerKind`] right at
//! the normalization boundary, so nothing past the planner ever carries a
//! raw routing string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the turn-processing handlers, or the terminal marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Plain LLM answer with no external lookups
    SimpleLlm,
    /// Retrieval-augmented answer over uploaded documents
    Rag,
    /// Web search combined with the curriculum knowledge base
    #[serde(rename = "websearch")]
    WebSearch,
    /// Image generation or editing
    Image,
    /// Stop executing the plan
    End,
}

impl HandlerKind {
    /// All handler kinds that do work (excludes `End`)
    pub const HANDLERS: [HandlerKind; 4] = [
        HandlerKind::SimpleLlm,
        HandlerKind::Rag,
        HandlerKind::WebSearch,
        HandlerKind::Image,
    ];

    /// Canonical token
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::SimpleLlm => "simple_llm",
            HandlerKind::Rag => "rag",
            HandlerKind::WebSearch => "websearch",
            HandlerKind::Image => "image",
            HandlerKind::End => "end",
        }
    }

    /// Name shown to the planner model
    pub fn display_name(&self) -> &'static str {
        match self {
            HandlerKind::SimpleLlm => "SimpleAnswer",
            HandlerKind::Rag => "Retrieval",
            HandlerKind::WebSearch => "WebSearch",
            HandlerKind::Image => "Image",
            HandlerKind::End => "End",
        }
    }

    /// Map a model-produced token to a handler, if it is recognized
    pub fn parse(token: &str) -> Option<Self> {
        let key: String = token
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "simplellm" | "simpleanswer" | "simple" | "llm" | "answer" | "chat" | "general" => {
                Some(HandlerKind::SimpleLlm)
            }
            "rag" | "retrieval" | "retrieve" | "document" | "documents" | "docs" | "docqa" => {
                Some(HandlerKind::Rag)
            }
            "websearch" | "search" | "web" | "internet" | "googlesearch" => {
                Some(HandlerKind::WebSearch)
            }
            "image" | "images" | "imagegeneration" | "imagegen" | "generateimage" | "draw" => {
                Some(HandlerKind::Image)
            }
            "end" | "finish" | "done" | "stop" => Some(HandlerKind::End),
            _ => None,
        }
    }

    /// Like [`HandlerKind::parse`], but unknown tokens become `SimpleLlm`
    pub fn normalize(token: &str) -> Self {
        Self::parse(token).unwrap_or(HandlerKind::SimpleLlm)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the orchestrator sends control next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", content = "handler", rename_all = "snake_case")]
pub enum Route {
    Handler(HandlerKind),
    End,
}

impl Route {
    pub fn is_end(&self) -> bool {
        matches!(self, Route::End)
    }

    /// Route for a plan step; an `End` step is the terminal route
    pub fn for_task(kind: HandlerKind) -> Self {
        match kind {
            HandlerKind::End => Route::End,
            other => Route::Handler(other),
        }
    }
}

impl Default for Route {
    fn default() -> Self {
        Route::End
    }
}
