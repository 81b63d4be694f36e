//! Tutor Router - turn routing core for AI tutors
//!
//! Routes each learner message through a planned sequence of handlers and
//! merges their outputs into one answer.
//!
//! # Overview
//!
//! - An LLM planner turns the message and session hints into an ordered
//!   execution plan (`routing`)
//! - The orchestrator walks the plan step by step, folding every handler
//!   result into the turn state (`orchestrator`, `session`)
//! - Four handlers answer: plain LLM, retrieval over uploaded documents,
//!   web search combined with the curriculum knowledge base, and image
//!   generation/editing (`handlers`)
//! - Retrieval stores per-session document chunks in a vector database and
//!   a TTL sweep removes stale sessions (`retrieval`)
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tutor_router::handlers::{ChatModel, ChunkSink, HandlerRegistry, SimpleAnswerHandler};
//! use tutor_router::orchestrator::Orchestrator;
//! use tutor_router::routing::{HandlerKind, LlmPlanner};
//! use tutor_router::session::{HistoryCompactor, HistorySettings, LearnerProfile, TurnInput, TurnState};
//! use tutor_router::testing::MockLlmProvider;
//!
//! # tokio_test::block_on(async {
//! let planner = LlmPlanner::new(
//!     Arc::new(MockLlmProvider::single_response(
//!         r#"{"execution_order": ["SimpleLLM"], "reasoning": "chat"}"#,
//!     )),
//!     "mock-model".to_string(),
//! );
//! let answers = ChatModel::new(
//!     Arc::new(MockLlmProvider::single_response("Plants make sugar from light.")),
//!     "mock-model",
//! );
//! let orchestrator = Orchestrator::new(
//!     Arc::new(planner),
//!     HandlerRegistry::new().register(Arc::new(SimpleAnswerHandler::new(answers))),
//!     HistoryCompactor::without_summarizer(HistorySettings::default()),
//! );
//!
//! let mut state = TurnState::new("session-1", LearnerProfile::default());
//! let report = orchestrator
//!     .run_turn(&mut state, TurnInput::message("What is photosynthesis?"), &ChunkSink::disabled())
//!     .await;
//!
//! assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);
//! assert_eq!(report.answer, "Plants make sugar from light.");
//! # });
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod imaging;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod retrieval;
pub mod routing;
pub mod search;
pub mod session;
pub mod testing;

pub use config::{ConfigError, TutorConfig};
pub use error::{TutorError, TutorResult};
pub use orchestrator::{Orchestrator, TurnReport};
pub use routing::{HandlerKind, Route};
pub use session::{TurnInput, TurnState};
