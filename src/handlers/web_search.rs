//! Web search answer, blended with the curriculum knowledge base

use super::prompts::{build_messages, persona_prompt, session_context_block, web_search_instructions};
use super::stream::stream_answer;
use super::{ChatModel, ChunkSink, Handler, HandlerFailure, HandlerOutcome, HandlerOutput};
use crate::retrieval::{CollectionKey, RetrievalQuery, RetrievedDocument, Retriever};
use crate::routing::HandlerKind;
use crate::search::WebSearch;
use crate::session::TurnState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const WEB_SEARCH_APOLOGY: &str = "Sorry, I couldn't search the web for that.";

/// Runs the web search and the knowledge-base lookup concurrently, then
/// answers with whichever source is stronger framed as primary
pub struct WebSearchHandler {
    model: ChatModel,
    search: Arc<dyn WebSearch>,
    retriever: Arc<Retriever>,
    max_results: usize,
    top_k: usize,
    score_threshold: Option<f32>,
}

impl WebSearchHandler {
    pub fn new(model: ChatModel, search: Arc<dyn WebSearch>, retriever: Arc<Retriever>) -> Self {
        Self {
            model,
            search,
            retriever,
            max_results: 5,
            top_k: 5,
            score_threshold: None,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    async fn knowledge_base(&self, state: &TurnState) -> Vec<RetrievedDocument> {
        let key = CollectionKey::knowledge_base(&state.profile);
        let query = RetrievalQuery {
            query: &state.resolved_query,
            top_k: self.top_k,
            score_threshold: self
                .score_threshold
                .unwrap_or_else(|| state.profile.persona.default_score_threshold()),
            url_filter: None,
        };
        match self.retriever.retrieve(&key, query).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(collection = %key, error = %e, "Knowledge base lookup failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Handler for WebSearchHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::WebSearch
    }

    async fn handle(&self, state: &TurnState, sink: &ChunkSink) -> HandlerOutcome {
        let (web, kb) = tokio::join!(
            self.search.search(&state.resolved_query, self.max_results),
            self.knowledge_base(state)
        );

        let hits = match web {
            Ok(hits) => hits,
            Err(e) if kb.is_empty() => {
                warn!(error = %e, "Web search failed with no knowledge base fallback");
                return Err(HandlerFailure::from_error(WEB_SEARCH_APOLOGY, &e));
            }
            Err(e) => {
                warn!(error = %e, "Web search failed, answering from knowledge base");
                Vec::new()
            }
        };
        debug!(web_hits = hits.len(), kb_hits = kb.len(), "Search context gathered");

        let system = format!(
            "{}\n\n{}{}",
            persona_prompt(&state.profile),
            web_search_instructions(&kb, &hits),
            session_context_block(state)
        );
        let request = self.model.request(build_messages(state, system));

        match stream_answer(self.model.provider.as_ref(), request, self.kind(), sink).await {
            Ok((text, usage)) => Ok(HandlerOutput::text(text, usage)),
            Err(e) => {
                warn!(error = %e, "Web search answer failed");
                Err(HandlerFailure::from_error(WEB_SEARCH_APOLOGY, &e))
            }
        }
    }
}
