//! Plain LLM answer

use super::prompts::{build_messages, persona_prompt, session_context_block};
use super::stream::stream_answer;
use super::{ChatModel, ChunkSink, Handler, HandlerFailure, HandlerOutcome, HandlerOutput};
use crate::routing::HandlerKind;
use crate::session::TurnState;
use async_trait::async_trait;
use tracing::warn;

pub const SIMPLE_APOLOGY: &str = "Sorry, I couldn't generate an answer.";

/// Answers from the model alone, in the persona's voice
pub struct SimpleAnswerHandler {
    model: ChatModel,
}

impl SimpleAnswerHandler {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Handler for SimpleAnswerHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::SimpleLlm
    }

    async fn handle(&self, state: &TurnState, sink: &ChunkSink) -> HandlerOutcome {
        let system = format!(
            "{}{}",
            persona_prompt(&state.profile),
            session_context_block(state)
        );
        let request = self.model.request(build_messages(state, system));

        match stream_answer(self.model.provider.as_ref(), request, self.kind(), sink).await {
            Ok((text, usage)) => Ok(HandlerOutput::text(text, usage)),
            Err(e) => {
                warn!(error = %e, "Simple answer failed");
                Err(HandlerFailure::from_error(SIMPLE_APOLOGY, &e))
            }
        }
    }
}
