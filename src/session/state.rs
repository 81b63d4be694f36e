//! Per-conversation turn state
//!
//! One [`TurnState`] is owned by exactly one conversation and threaded by
//! `&mut` through the orchestrator. Handlers only ever see `&TurnState`; the
//! orchestrator writes their outcome back with [`TurnState::apply_outcome`].

use crate::handlers::{HandlerOutcome, MergeStrategy};
use crate::llm::provider::TokenUsage;
use crate::routing::{HandlerKind, Route};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tutor the learner is talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Teacher,
    Student,
}

impl Persona {
    /// Similarity threshold used by document retrieval
    pub fn default_score_threshold(&self) -> f32 {
        match self {
            Persona::Teacher => 0.7,
            Persona::Student => 0.6,
        }
    }

    /// How multi-step results are combined into the final answer
    pub fn merge_strategy(&self) -> MergeStrategy {
        match self {
            Persona::Teacher => MergeStrategy::Concatenate,
            Persona::Student => MergeStrategy::LastResult,
        }
    }
}

/// Learner profile used to personalize prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    #[serde(default)]
    pub persona: Persona,
    pub name: String,
    pub grade: String,
    pub subject: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Open homework, assignments or review topics
    #[serde(default)]
    pub pending_items: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Assistant,
}

/// One chat turn in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Type of a newly uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Document,
    Image,
}

/// A file uploaded alongside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub name: String,
    pub kind: UploadKind,
    /// Extracted text, ingested into the session collection when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UploadedFile {
    pub fn document(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            kind: UploadKind::Document,
            content: None,
        }
    }

    pub fn image(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            kind: UploadKind::Image,
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn is_image(&self) -> bool {
        self.kind == UploadKind::Image
    }
}

/// Output of one completed plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateResult {
    pub handler: HandlerKind,
    pub query: String,
    pub output: String,
}

/// State carried between turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// First handler of the previous plan, used as a routing hint
    pub last_route: Option<HandlerKind>,
    /// Condensed summary of messages older than the retention window
    pub summary: Option<String>,
}

/// One inbound user turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    /// New user message; `None` re-enters the orchestrator without a new query
    pub message: Option<String>,
    #[serde(default)]
    pub uploads: Vec<UploadedFile>,
    #[serde(default)]
    pub websearch_enabled: bool,
}

impl TurnInput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_upload(mut self, upload: UploadedFile) -> Self {
        self.uploads.push(upload);
        self
    }

    pub fn with_websearch(mut self, enabled: bool) -> Self {
        self.websearch_enabled = enabled;
        self
    }
}

/// Coarse state machine phase, derived from the fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Planning,
    Executing,
    Terminal,
}

/// Mutable per-conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub session_id: String,
    pub profile: LearnerProfile,
    pub messages: Vec<ChatMessage>,

    pub user_query: String,
    /// Query handed to handlers; always the user query (no rewriting step)
    pub resolved_query: String,

    pub tasks: Vec<HandlerKind>,
    pub task_index: usize,
    pub current_task: Option<HandlerKind>,
    pub intermediate_results: Vec<IntermediateResult>,

    pub response: Option<String>,
    pub final_answer: Option<String>,
    pub route: Route,

    pub simple_response: Option<String>,
    pub rag_response: Option<String>,
    pub websearch_response: Option<String>,
    pub image_response: Option<String>,

    pub context: SessionContext,

    /// Every document uploaded during the session
    pub doc_urls: Vec<String>,
    /// Documents uploaded with the current message
    pub active_docs: Vec<String>,
    /// Images uploaded with the current message, candidates for editing
    pub edit_img_urls: Vec<String>,
    pub new_uploaded_docs: Vec<UploadedFile>,
    /// Running list of images in the session
    pub img_urls: Vec<String>,

    pub websearch_enabled: bool,
    pub usage: TokenUsage,
}

impl TurnState {
    pub fn new(session_id: impl Into<String>, profile: LearnerProfile) -> Self {
        Self {
            session_id: session_id.into(),
            profile,
            messages: Vec::new(),
            user_query: String::new(),
            resolved_query: String::new(),
            tasks: Vec::new(),
            task_index: 0,
            current_task: None,
            intermediate_results: Vec::new(),
            response: None,
            final_answer: None,
            route: Route::End,
            simple_response: None,
            rag_response: None,
            websearch_response: None,
            image_response: None,
            context: SessionContext::default(),
            doc_urls: Vec::new(),
            active_docs: Vec::new(),
            edit_img_urls: Vec::new(),
            new_uploaded_docs: Vec::new(),
            img_urls: Vec::new(),
            websearch_enabled: false,
            usage: TokenUsage::default(),
        }
    }

    /// Current state machine phase
    pub fn phase(&self) -> TurnPhase {
        if self.tasks.is_empty() {
            TurnPhase::Planning
        } else if self.route.is_end() && self.final_answer.is_some() {
            TurnPhase::Terminal
        } else {
            TurnPhase::Executing
        }
    }

    pub fn document_available(&self) -> bool {
        !self.doc_urls.is_empty()
    }

    /// A non-image file arrived with the current message
    pub fn freshly_uploaded_document(&self) -> bool {
        self.new_uploaded_docs.iter().any(|u| !u.is_image())
    }

    /// Documents retrieval should be restricted to
    pub fn retrieval_url_filter(&self) -> Option<Vec<String>> {
        if !self.active_docs.is_empty() {
            Some(self.active_docs.clone())
        } else if !self.doc_urls.is_empty() {
            Some(self.doc_urls.clone())
        } else {
            None
        }
    }

    /// Forget the previous plan and its results
    pub fn reset_plan(&mut self) {
        self.tasks.clear();
        self.task_index = 0;
        self.current_task = None;
        self.intermediate_results.clear();
        self.response = None;
        self.final_answer = None;
        self.route = Route::End;
        self.simple_response = None;
        self.rag_response = None;
        self.websearch_response = None;
        self.image_response = None;
    }

    /// Record a handler's outcome; failures become their apology text
    pub fn apply_outcome(&mut self, kind: HandlerKind, outcome: HandlerOutcome) {
        let (text, usage, image_url) = match outcome {
            Ok(output) => (output.text, output.usage, output.image_url),
            Err(failure) => (failure.message, failure.usage, None),
        };

        self.usage.accumulate(&usage);
        if let Some(url) = image_url {
            self.img_urls.push(url);
        }

        let alias = match kind {
            HandlerKind::SimpleLlm => &mut self.simple_response,
            HandlerKind::Rag => &mut self.rag_response,
            HandlerKind::WebSearch => &mut self.websearch_response,
            HandlerKind::Image => &mut self.image_response,
            HandlerKind::End => {
                self.response = Some(text);
                return;
            }
        };
        *alias = Some(text.clone());
        self.response = Some(text);
    }

    /// Last `limit` messages rendered as `Role: text` lines
    pub fn recent_history_text(&self, limit: usize) -> String {
        render_history(&self.messages, limit)
    }

    /// Like [`recent_history_text`](Self::recent_history_text), but without
    /// the learner message that opened the current turn
    pub fn prior_history_text(&self, limit: usize) -> String {
        let end = match self.messages.last() {
            Some(last) if last.role == ChatRole::Human && last.content == self.user_query => {
                self.messages.len() - 1
            }
            _ => self.messages.len(),
        };
        render_history(&self.messages[..end], limit)
    }
}

fn render_history(messages: &[ChatMessage], limit: usize) -> String {
    let start = messages.len().saturating_sub(limit);
    messages[start..]
        .iter()
        .map(|m| {
            let speaker = match m.role {
                ChatRole::Human => "Learner",
                ChatRole::Assistant => "Tutor",
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
