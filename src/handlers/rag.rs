//! Retrieval-augmented answer over the session's uploaded documents

use super::prompts::{build_messages, document_context, persona_prompt, session_context_block};
use super::stream::stream_answer;
use super::{ChatModel, ChunkSink, Handler, HandlerFailure, HandlerOutcome, HandlerOutput};
use crate::retrieval::{CollectionKey, RetrievalQuery, Retriever};
use crate::routing::HandlerKind;
use crate::session::TurnState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RAG_APOLOGY: &str = "Sorry, I couldn't answer from your documents.";

/// Answers grounded in chunks retrieved from the session collection
pub struct RagHandler {
    model: ChatModel,
    retriever: Arc<Retriever>,
    top_k: usize,
    /// Overrides the persona default when set
    score_threshold: Option<f32>,
}

impl RagHandler {
    pub fn new(model: ChatModel, retriever: Arc<Retriever>) -> Self {
        Self {
            model,
            retriever,
            top_k: 5,
            score_threshold: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }
}

#[async_trait]
impl Handler for RagHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Rag
    }

    async fn handle(&self, state: &TurnState, sink: &ChunkSink) -> HandlerOutcome {
        let key = CollectionKey::session(&state.session_id, &state.profile);
        let url_filter = state.retrieval_url_filter();
        let query = RetrievalQuery {
            query: &state.resolved_query,
            top_k: self.top_k,
            score_threshold: self
                .score_threshold
                .unwrap_or_else(|| state.profile.persona.default_score_threshold()),
            url_filter: url_filter.as_deref(),
        };

        let documents = match self.retriever.retrieve(&key, query).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(collection = %key, error = %e, "Document retrieval failed");
                return Err(HandlerFailure::from_error(RAG_APOLOGY, &e));
            }
        };
        debug!(collection = %key, hits = documents.len(), "Retrieved context");

        let system = format!(
            "{}\n\n{}{}",
            persona_prompt(&state.profile),
            document_context(&documents),
            session_context_block(state)
        );
        let request = self.model.request(build_messages(state, system));

        match stream_answer(self.model.provider.as_ref(), request, self.kind(), sink).await {
            Ok((text, usage)) => Ok(HandlerOutput::text(text, usage)),
            Err(e) => {
                warn!(error = %e, "Retrieval answer failed");
                Err(HandlerFailure::from_error(RAG_APOLOGY, &e))
            }
        }
    }
}
