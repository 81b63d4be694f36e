//! Mock implementations for testing
//!
//! In-memory stand-ins for every external collaborator: chat model,
//! embedder, vector store, web search, image API, plus a scripted planner
//! and a canned handler for orchestrator scenarios.

use crate::handlers::{ChunkSink, Handler, HandlerFailure, HandlerOutcome, HandlerOutput};
use crate::imaging::{ImageError, ImageGenerator, ImageRequest};
use crate::llm::embedding::{Embedder, EmbeddingError};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, CompletionStream, FinishReason, LlmError, LlmProvider,
    StreamEvent, TokenUsage,
};
use crate::retrieval::{Point, PointPayload, ScoredPoint, UrlFilter, VectorStore, VectorStoreError};
use crate::routing::{ExecutionPlan, HandlerKind, PlanOutcome, Planner, PlanningContext};
use crate::search::{SearchError, SearchHit, WebSearch};
use crate::session::TurnState;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{mpsc, Mutex};

/// Usage reported by every mock completion
pub const MOCK_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// Mock LLM provider for testing
///
/// Responses are returned in order and cycle once exhausted.
#[derive(Debug, Default)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
    /// Characters per streamed delta; `None` streams the whole reply at once
    pub stream_chunk_size: Option<usize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn with_stream_chunk_size(mut self, chars: usize) -> Self {
        self.stream_chunk_size = Some(chars.max(1));
        self
    }

    /// Every request seen so far, in order
    pub async fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);
        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: MOCK_USAGE,
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
        let response = self.complete(request).await?;
        let content = response.content.unwrap_or_default();
        let chars: Vec<char> = content.chars().collect();
        let size = self.stream_chunk_size.unwrap_or(chars.len().max(1));

        let deltas: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
        let (tx, rx) = mpsc::channel(deltas.len() + 1);
        for delta in deltas {
            let _ = tx.send(Ok(StreamEvent::Delta(delta))).await;
        }
        let _ = tx.send(Ok(StreamEvent::Usage(response.usage))).await;
        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Deterministic embedder: normalized byte histogram, never negative
#[derive(Debug)]
pub struct MockEmbedder {
    dimensions: usize,
    pub should_fail: bool,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            should_fail: false,
        }
    }

    pub fn with_failure(dimensions: usize) -> Self {
        Self {
            should_fail: true,
            ..Self::new(dimensions)
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for byte in text.to_lowercase().bytes() {
            vector[byte as usize % self.dimensions] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.should_fail {
            return Err(EmbeddingError::RequestFailed(
                "Mock embedding failure".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    collections: BTreeMap<String, Vec<Point>>,
    fixed_score: Option<f32>,
    failing_scrolls: HashSet<String>,
}

/// In-memory vector store with cosine search
#[derive(Debug, Default)]
pub struct MockVectorStore {
    state: StdMutex<StoreState>,
    unreachable: AtomicBool,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reachable(&self) -> Result<(), VectorStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(VectorStoreError::Connection(
                "mock vector store unreachable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Every subsequent call fails with a connection error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Report this score for every point instead of the cosine similarity
    pub fn set_fixed_score(&self, score: Option<f32>) {
        self.state().fixed_score = score;
    }

    pub fn fail_scroll_for(&self, collection: &str) {
        self.state().failing_scrolls.insert(collection.to_string());
    }

    pub fn create_empty(&self, collection: &str) {
        self.state()
            .collections
            .entry(collection.to_string())
            .or_default();
    }

    /// Add a point with a zero vector, bypassing embedding
    pub fn insert_payload(&self, collection: &str, payload: PointPayload) {
        let mut state = self.state();
        let points = state.collections.entry(collection.to_string()).or_default();
        points.push(Point {
            id: format!("p{}", points.len()),
            vector: Vec::new(),
            payload,
        });
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.state().collections.contains_key(collection)
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        self.check_reachable()?;
        Ok(self.has_collection(name))
    }

    async fn create_collection(&self, name: &str, _dimensions: usize) -> Result<(), VectorStoreError> {
        self.check_reachable()?;
        self.create_empty(name);
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<(), VectorStoreError> {
        self.check_reachable()?;
        let mut state = self.state();
        let existing = state
            .collections
            .get_mut(name)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
        for point in points {
            existing.retain(|p| p.id != point.id);
            existing.push(point);
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<UrlFilter<'_>>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        self.check_reachable()?;
        let state = self.state();
        let points = state
            .collections
            .get(name)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;

        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| filter.map_or(true, |UrlFilter(urls)| urls.contains(&p.payload.source.url)))
            .map(|p| ScoredPoint {
                payload: p.payload.clone(),
                score: state.fixed_score.unwrap_or_else(|| cosine(vector, &p.vector)),
            })
            .filter(|p| p.score >= score_threshold)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.check_reachable()?;
        self.state()
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))
    }

    async fn scroll(
        &self,
        name: &str,
        _page_size: usize,
    ) -> Result<Vec<PointPayload>, VectorStoreError> {
        self.check_reachable()?;
        let state = self.state();
        if state.failing_scrolls.contains(name) {
            return Err(VectorStoreError::Api {
                status: 500,
                message: format!("scroll failed for {name}"),
            });
        }
        let points = state
            .collections
            .get(name)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
        Ok(points.iter().map(|p| p.payload.clone()).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.check_reachable()?;
        Ok(self.state().collections.keys().cloned().collect())
    }
}

/// Canned web search results
#[derive(Debug, Default)]
pub struct MockWebSearch {
    hits: Vec<SearchHit>,
    should_fail: bool,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockWebSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl WebSearch for MockWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().await.push(query.to_string());
        if self.should_fail {
            return Err(SearchError::Api {
                status: 503,
                message: "Mock search failure".to_string(),
            });
        }
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

/// Image API stand-in returning a fixed URL
#[derive(Debug, Default)]
pub struct MockImageGenerator {
    url: String,
    should_fail: bool,
    requests: Arc<Mutex<Vec<ImageRequest>>>,
}

impl MockImageGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<String, ImageError> {
        self.requests.lock().await.push(request.clone());
        if self.should_fail {
            return Err(ImageError::Api {
                status: 500,
                message: "Mock image failure".to_string(),
            });
        }
        Ok(self.url.clone())
    }
}

/// Planner returning a fixed plan
#[derive(Debug, Default)]
pub struct MockPlanner {
    steps: Vec<HandlerKind>,
    fallback: bool,
    contexts: Arc<Mutex<Vec<PlanningContext>>>,
}

impl MockPlanner {
    pub fn new(steps: Vec<HandlerKind>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Report the plan as a fallback
    pub fn fallback(steps: Vec<HandlerKind>) -> Self {
        Self {
            steps,
            fallback: true,
            ..Default::default()
        }
    }

    /// Contexts passed to `plan`, one per planning call
    pub async fn contexts(&self) -> Vec<PlanningContext> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, ctx: &PlanningContext) -> PlanOutcome {
        self.contexts.lock().await.push(ctx.clone());
        let plan = ExecutionPlan {
            steps: self.steps.clone(),
            reasoning: "scripted".to_string(),
        };
        if self.fallback {
            PlanOutcome::Fallback {
                plan,
                reason: "scripted fallback".to_string(),
            }
        } else {
            PlanOutcome::Planned {
                plan,
                usage: MOCK_USAGE,
            }
        }
    }
}

/// Handler answering with fixed text
#[derive(Debug)]
pub struct MockHandler {
    kind: HandlerKind,
    text: String,
    should_fail: bool,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockHandler {
    pub fn new(kind: HandlerKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            should_fail: false,
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handler whose outcome is always this apology
    pub fn failing(kind: HandlerKind, apology: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            ..Self::new(kind, apology)
        }
    }

    /// Resolved queries seen, one per invocation
    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn handle(&self, state: &TurnState, _sink: &ChunkSink) -> HandlerOutcome {
        self.queries.lock().await.push(state.resolved_query.clone());
        if self.should_fail {
            Err(HandlerFailure::new(self.text.clone()))
        } else {
            Ok(HandlerOutput::text(self.text.clone(), MOCK_USAGE))
        }
    }
}
