//! Conversation state
//!
//! [`TurnState`] is the per-session record the orchestrator mutates;
//! [`HistoryCompactor`] keeps its message log bounded.

pub mod history;
pub mod state;

pub use history::{HistoryCompactor, HistorySettings};
pub use state::{
    ChatMessage, ChatRole, IntermediateResult, LearnerProfile, Persona, SessionContext,
    TurnInput, TurnPhase, TurnState, UploadKind, UploadedFile,
};
