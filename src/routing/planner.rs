//! LLM-based execution planner
//!
//! Given the latest user message and a little session context, the planner
//! asks a chat model which handlers should run, and in which order. The
//! planner never fails: a provider error or an unparsable reply yields a
//! fixed fallback plan, reported as [`PlanOutcome::Fallback`] so callers can
//! see that it happened.

use crate::llm::provider::{CompletionRequest, LlmProvider, Message, ResponseFormat, TokenUsage};
use crate::routing::handler_kind::HandlerKind;
use crate::routing::schema::ExecutionPlanOutput;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First brace-delimited object in a model reply, spanning lines
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"));

const PLANNER_SYSTEM_PROMPT: &str = r#"You are the routing planner for an AI tutor. Decide which handlers must run, in order, to answer the learner's latest message.

HANDLERS:
- SimpleAnswer: explain, chat, quiz or tutor from general knowledge.
- Retrieval: answer from the documents the learner uploaded. Only when a document is available.
- WebSearch: current events, recent facts, or anything needing fresh sources. Only when web search is enabled.
- Image: create a new picture or edit a previously generated/uploaded image.
- End: nothing to do.

RULES:
1. Prefer a single handler. Use several only when the message clearly asks for several things (e.g. "summarize my notes and draw a diagram").
2. If the message refers to "this document", "my notes", "the file" and a document is available, use Retrieval.
3. Follow-up questions usually keep the previous route.
4. Never choose Retrieval when no document is available, never choose WebSearch when it is disabled.

Respond with JSON only: {"execution_order": ["HandlerName", ...], "reasoning": "one short sentence"}"#;

/// Everything the planner needs to know about the turn
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub user_message: String,
    pub recent_history: String,
    pub session_summary: Option<String>,
    pub last_route: Option<HandlerKind>,
    pub document_available: bool,
    pub websearch_enabled: bool,
    /// Images already in the session (generated or uploaded)
    pub uploaded_images: usize,
    /// File names uploaded with this very message
    pub newly_uploaded_docs: Vec<String>,
}

impl PlanningContext {
    /// Plan used whenever the model cannot be consulted
    pub fn fallback_plan(&self) -> Vec<HandlerKind> {
        if self.document_available || !self.newly_uploaded_docs.is_empty() {
            vec![HandlerKind::Rag]
        } else {
            vec![HandlerKind::SimpleLlm]
        }
    }

    /// Dynamic context block appended to the static prompt
    pub fn render(&self) -> String {
        let summary = self
            .session_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("None");
        let history = if self.recent_history.trim().is_empty() {
            "None"
        } else {
            self.recent_history.as_str()
        };
        let last_route = self
            .last_route
            .map(|r| r.display_name())
            .unwrap_or("None");
        let new_docs = if self.newly_uploaded_docs.is_empty() {
            "None".to_string()
        } else {
            self.newly_uploaded_docs.join(", ")
        };

        format!(
            "SESSION SUMMARY:\n{summary}\n\nRECENT CONVERSATION:\n{history}\n\nPREVIOUS ROUTE: {last_route}\nDOCUMENT AVAILABLE: {}\nWEB SEARCH ENABLED: {}\nIMAGES IN SESSION: {}\nNEWLY UPLOADED FILES: {new_docs}\n\nLEARNER MESSAGE:\n{}",
            yes_no(self.document_available),
            yes_no(self.websearch_enabled),
            self.uploaded_images,
            self.user_message,
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// A normalized plan
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub steps: Vec<HandlerKind>,
    pub reasoning: String,
}

/// Result of planning; fallbacks carry the reason they were needed
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Planned {
        plan: ExecutionPlan,
        usage: TokenUsage,
    },
    Fallback {
        plan: ExecutionPlan,
        reason: String,
    },
}

impl PlanOutcome {
    pub fn plan(&self) -> &ExecutionPlan {
        match self {
            PlanOutcome::Planned { plan, .. } | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> ExecutionPlan {
        match self {
            PlanOutcome::Planned { plan, .. } | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PlanOutcome::Fallback { .. })
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            PlanOutcome::Planned { usage, .. } => *usage,
            PlanOutcome::Fallback { .. } => TokenUsage::default(),
        }
    }
}

/// Planner trait, the seam between the orchestrator and plan generation
#[async_trait::async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &PlanningContext) -> PlanOutcome;
}

/// Plan parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanParseError {
    #[error("no JSON object found in planner output")]
    NoJsonObject,
    #[error("invalid plan JSON: {0}")]
    InvalidJson(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// Locate and decode the plan object inside free-form model output
pub fn parse_plan_output(raw: &str) -> Result<ExecutionPlanOutput, PlanParseError> {
    let candidate = JSON_OBJECT
        .find(raw)
        .map(|m| m.as_str())
        .ok_or(PlanParseError::NoJsonObject);

    let output = match candidate {
        Ok(object) => match serde_json::from_str::<ExecutionPlanOutput>(object) {
            Ok(output) => output,
            Err(first_error) => decode_unescaped(raw)
                .ok_or_else(|| PlanParseError::InvalidJson(first_error.to_string()))?,
        },
        Err(e) => decode_unescaped(raw).ok_or(e)?,
    };

    output.validate().map_err(PlanParseError::InvalidPlan)?;
    Ok(output)
}

/// Second attempt for models that escape braces (`\{`, `{{`)
fn decode_unescaped(raw: &str) -> Option<ExecutionPlanOutput> {
    let unescaped = raw
        .replace("\\{", "{")
        .replace("\\}", "}")
        .replace("{{", "{")
        .replace("}}", "}")
        .replace("\\\"", "\"");
    let object = JSON_OBJECT.find(&unescaped)?;
    serde_json::from_str(object.as_str()).ok()
}

/// LLM-backed planner
pub struct LlmPlanner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String) -> Self {
        Self {
            provider,
            model,
            temperature: 0.1,
        }
    }

    /// Create planner with custom temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_completion_request(&self, ctx: &PlanningContext) -> CompletionRequest {
        let schema = serde_json::to_string(&ExecutionPlanOutput::json_schema())
            .unwrap_or_else(|_| "{}".to_string());

        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(format!(
                    "{PLANNER_SYSTEM_PROMPT}\n\nJSON schema of the reply:\n{schema}"
                )),
                Message::user(ctx.render()),
            ],
        )
        .with_temperature(Some(self.temperature))
        .with_max_tokens(Some(300));

        if self.provider.name() == "openai" {
            request.response_format = Some(ResponseFormat::Json);
        }
        request
    }

    fn fallback(ctx: &PlanningContext, reason: String) -> PlanOutcome {
        let plan = ExecutionPlan {
            steps: ctx.fallback_plan(),
            reasoning: "fallback plan".to_string(),
        };
        warn!(
            reason = %reason,
            plan = ?plan.steps,
            "Planner falling back to default plan"
        );
        PlanOutcome::Fallback { plan, reason }
    }
}

#[async_trait::async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, ctx: &PlanningContext) -> PlanOutcome {
        info!("LlmPlanner computing execution plan");

        let request = self.build_completion_request(ctx);
        debug!(
            "Planning context:\n{}",
            request
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default()
        );

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => return Self::fallback(ctx, format!("planner call failed: {e}")),
        };

        let content = match response.content {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Self::fallback(ctx, "planner returned no content".to_string()),
        };

        match parse_plan_output(&content) {
            Ok(output) => {
                let plan = ExecutionPlan {
                    steps: output.handler_kinds(),
                    reasoning: output.reasoning,
                };
                info!(
                    plan = ?plan.steps,
                    reasoning = %plan.reasoning,
                    "Parsed execution plan"
                );
                PlanOutcome::Planned {
                    plan,
                    usage: response.usage,
                }
            }
            Err(e) => {
                warn!(error = %e, response = %content, "Failed to parse execution plan");
                Self::fallback(ctx, e.to_string())
            }
        }
    }
}
