//! Turn orchestrator
//!
//! Drives one conversation turn through `Planning → Executing → Terminal`.
//! [`Orchestrator::step`] is a single visit of the orchestrator node: it
//! plans when there is no plan, folds the last handler response into the
//! results and advances the cursor, or merges the results into the final
//! answer once the plan is exhausted. [`Orchestrator::run_turn`] alternates
//! `step` with handler dispatch until the route is `End`.

use crate::handlers::{ChunkSink, HandlerFailure, HandlerOutcome, HandlerRegistry, TurnEvent};
use crate::llm::provider::TokenUsage;
use crate::observability::metrics;
use crate::retrieval::{CollectionKey, Retriever, SourceDocument};
use crate::routing::{adjust_plan, HandlerKind, PlanAdjustment, Planner, PlanningContext, Route};
use crate::session::{
    ChatMessage, HistoryCompactor, IntermediateResult, TurnInput, TurnPhase, TurnState,
};
use crate::{handler_span, turn_span};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Answer used when a plan finishes without producing any output
pub const EMPTY_PLAN_ANSWER: &str = "I'm not sure how to help with that. Could you rephrase?";

/// Longest plan the orchestrator will execute; longer plans are truncated
pub const MAX_PLAN_STEPS: usize = 8;

/// How uploaded document text is chunked before ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Summary of one completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub answer: String,
    /// Handlers dispatched, in order
    pub executed: Vec<HandlerKind>,
    /// Handlers whose outcome was an apology
    pub failed: Vec<HandlerKind>,
    /// Tokens spent during this turn only
    pub usage: TokenUsage,
    pub elapsed: Duration,
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    handlers: HandlerRegistry,
    history: HistoryCompactor,
    ingestion: Option<(Arc<Retriever>, IngestionSettings)>,
    /// Upper bound on node visits per turn
    max_steps: usize,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        handlers: HandlerRegistry,
        history: HistoryCompactor,
    ) -> Self {
        Self {
            planner,
            handlers,
            history,
            ingestion: None,
            max_steps: 32,
        }
    }

    /// Ingest uploaded document text into the session collection
    pub fn with_ingestion(mut self, retriever: Arc<Retriever>, settings: IngestionSettings) -> Self {
        self.ingestion = Some((retriever, settings));
        self
    }

    /// At least two visits: one to dispatch a step, one to finish
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(2);
        self
    }

    /// Steps a plan may hold so every step and the final merge fit in `max_steps`
    fn plan_limit(&self) -> usize {
        MAX_PLAN_STEPS.min(self.max_steps - 1)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Apply a new user turn to the state.
    ///
    /// Input without a message leaves the state untouched, so a finished
    /// turn stays finished.
    pub async fn begin_turn(&self, state: &mut TurnState, input: TurnInput) {
        let Some(message) = input.message else {
            debug!(session_id = %state.session_id, "No new message, state unchanged");
            return;
        };

        state.reset_plan();
        state.messages.push(ChatMessage::human(message.clone()));
        state.user_query = message.clone();
        state.resolved_query = message;
        state.websearch_enabled = input.websearch_enabled;

        state.active_docs.clear();
        state.edit_img_urls.clear();
        for upload in &input.uploads {
            if upload.is_image() {
                state.edit_img_urls.push(upload.url.clone());
            } else {
                if !state.doc_urls.contains(&upload.url) {
                    state.doc_urls.push(upload.url.clone());
                }
                state.active_docs.push(upload.url.clone());
            }
        }
        state.new_uploaded_docs = input.uploads;

        self.ingest_uploads(state).await;
        self.history.compact(state).await;
    }

    async fn ingest_uploads(&self, state: &TurnState) {
        let Some((retriever, settings)) = &self.ingestion else {
            return;
        };

        let documents: Vec<SourceDocument> = state
            .new_uploaded_docs
            .iter()
            .filter(|u| !u.is_image())
            .filter_map(|u| {
                u.content.as_ref().map(|text| SourceDocument {
                    url: u.url.clone(),
                    file_name: Some(u.name.clone()),
                    text: text.clone(),
                })
            })
            .collect();
        if documents.is_empty() {
            return;
        }

        let key = CollectionKey::session(&state.session_id, &state.profile);
        match retriever
            .store(&key, &documents, settings.chunk_size, settings.chunk_overlap)
            .await
        {
            Ok(chunks) => debug!(collection = %key, chunks, "Uploads ingested"),
            Err(e) => warn!(collection = %key, error = %e, "Upload ingestion failed"),
        }
    }

    /// One visit of the orchestrator node; returns where control goes next
    pub async fn step(&self, state: &mut TurnState) -> Route {
        if state.phase() == TurnPhase::Terminal {
            return Route::End;
        }

        if state.tasks.is_empty() {
            if state.user_query.is_empty() {
                return Route::End;
            }
            self.plan(state).await;
        } else {
            Self::record_pending(state);
        }

        match state.tasks.get(state.task_index).copied() {
            Some(kind) if kind != HandlerKind::End => {
                state.current_task = Some(kind);
                state.route = Route::Handler(kind);
                state.route
            }
            _ => {
                Self::finish(state);
                Route::End
            }
        }
    }

    async fn plan(&self, state: &mut TurnState) {
        let ctx = PlanningContext {
            user_message: state.resolved_query.clone(),
            recent_history: self.history.planner_history(state),
            session_summary: state.context.summary.clone(),
            last_route: state.context.last_route,
            document_available: state.document_available(),
            websearch_enabled: state.websearch_enabled,
            uploaded_images: state.img_urls.len() + state.edit_img_urls.len(),
            newly_uploaded_docs: state
                .new_uploaded_docs
                .iter()
                .filter(|u| !u.is_image())
                .map(|u| u.name.clone())
                .collect(),
        };

        let outcome = self.planner.plan(&ctx).await;
        metrics().plan_created(outcome.is_fallback());
        state.usage.accumulate(&outcome.usage());

        let mut steps = outcome.into_plan().steps;
        if steps.is_empty() {
            steps = ctx.fallback_plan();
        }
        let limit = self.plan_limit();
        if steps.len() > limit {
            warn!(planned = steps.len(), limit, "Plan too long, truncating");
            steps.truncate(limit);
        }
        state.tasks = steps;

        let adjustment = adjust_plan(state);
        if adjustment != PlanAdjustment::Unchanged {
            debug!(adjustment = ?adjustment, tasks = ?state.tasks, "Plan adjusted");
        }

        state.task_index = 0;
        state.current_task = state.tasks.first().copied();
        state.context.last_route = state.current_task;
        info!(session_id = %state.session_id, plan = ?state.tasks, "Turn planned");
    }

    /// Fold the last handler's output into the results and advance the cursor
    fn record_pending(state: &mut TurnState) {
        if let Some(response) = state.response.take() {
            let handler = state.current_task.unwrap_or(HandlerKind::SimpleLlm);
            state.intermediate_results.push(IntermediateResult {
                handler,
                query: state.resolved_query.clone(),
                output: response,
            });
            state.task_index += 1;
        }
    }

    fn finish(state: &mut TurnState) {
        Self::record_pending(state);
        let merged = state
            .profile
            .persona
            .merge_strategy()
            .merge(&state.intermediate_results)
            .unwrap_or_else(|| EMPTY_PLAN_ANSWER.to_string());

        state.route = Route::End;
        state.final_answer = Some(merged);
    }

    async fn dispatch(&self, kind: HandlerKind, state: &TurnState, sink: &ChunkSink) -> HandlerOutcome {
        let Some(handler) = self.handlers.get(kind) else {
            warn!(handler = %kind, "No handler registered");
            return Err(HandlerFailure::new(format!(
                "Sorry, {} is not available right now.",
                kind.display_name()
            )));
        };

        sink.emit(TurnEvent::HandlerStarted(kind));
        let started = Instant::now();
        let outcome = handler
            .handle(state, sink)
            .instrument(handler_span!(handler = %kind))
            .await;

        metrics().handler_finished(kind.as_str(), started.elapsed(), outcome.is_ok());
        sink.emit(TurnEvent::HandlerFinished {
            handler: kind,
            failed: outcome.is_err(),
        });
        outcome
    }

    /// Run a whole turn and return its report
    pub async fn run_turn(
        &self,
        state: &mut TurnState,
        input: TurnInput,
        sink: &ChunkSink,
    ) -> TurnReport {
        let span = turn_span!(session_id = %state.session_id);
        self.run_turn_inner(state, input, sink).instrument(span).await
    }

    async fn run_turn_inner(
        &self,
        state: &mut TurnState,
        input: TurnInput,
        sink: &ChunkSink,
    ) -> TurnReport {
        let started = Instant::now();
        let usage_before = state.usage;
        let new_message = input.message.is_some();
        if new_message {
            metrics().turn_received();
        }

        self.begin_turn(state, input).await;

        let mut executed = Vec::new();
        let mut failed = Vec::new();
        let mut visits = 0;
        loop {
            visits += 1;
            if visits > self.max_steps {
                warn!(max_steps = self.max_steps, "Step limit reached, finishing turn");
                Self::finish(state);
                break;
            }

            match self.step(state).await {
                Route::End => break,
                Route::Handler(kind) => {
                    let outcome = self.dispatch(kind, state, sink).await;
                    if outcome.is_err() {
                        failed.push(kind);
                    }
                    executed.push(kind);
                    state.apply_outcome(kind, outcome);
                }
            }
        }

        let answer = state.final_answer.clone().unwrap_or_default();
        let usage = usage_delta(&usage_before, &state.usage);
        if new_message {
            state.messages.push(ChatMessage::assistant(answer.clone()));
            metrics().tokens_used(&usage);
            metrics().turn_completed(started.elapsed());
        }
        sink.emit(TurnEvent::Final(answer.clone()));

        info!(
            steps = executed.len(),
            failures = failed.len(),
            tokens = usage.total_tokens,
            "Turn complete"
        );
        TurnReport {
            answer,
            executed,
            failed,
            usage,
            elapsed: started.elapsed(),
        }
    }
}

fn usage_delta(before: &TokenUsage, after: &TokenUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: after.prompt_tokens.saturating_sub(before.prompt_tokens),
        completion_tokens: after.completion_tokens.saturating_sub(before.completion_tokens),
        total_tokens: after.total_tokens.saturating_sub(before.total_tokens),
    }
}
