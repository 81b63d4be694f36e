//! Incremental output delivery
//!
//! Streaming handlers forward every text delta to a [`ChunkSink`], the
//! producer half of an unbounded channel owned by whoever drives the turn.
//! A disabled sink simply drops events.

use crate::llm::provider::{CompletionRequest, LlmError, LlmProvider, StreamEvent, TokenUsage};
use crate::routing::HandlerKind;
use tokio::sync::mpsc;
use tracing::trace;

/// Progress event emitted while a turn runs
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    HandlerStarted(HandlerKind),
    Delta { handler: HandlerKind, text: String },
    HandlerFinished { handler: HandlerKind, failed: bool },
    Final(String),
}

/// Producer side of the turn event channel
#[derive(Debug, Clone, Default)]
pub struct ChunkSink {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl ChunkSink {
    pub fn new(tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Sink plus the receiver that observes it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver just means nobody is watching anymore
            let _ = tx.send(event);
        }
    }
}

/// Stream a completion through the sink and return the full text and usage
pub async fn stream_answer(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    handler: HandlerKind,
    sink: &ChunkSink,
) -> Result<(String, TokenUsage), LlmError> {
    let mut stream = provider.stream(request).await?;
    let mut text = String::new();
    let mut usage = TokenUsage::default();

    while let Some(event) = stream.recv().await {
        match event? {
            StreamEvent::Delta(delta) => {
                trace!(handler = %handler, len = delta.len(), "delta");
                text.push_str(&delta);
                sink.emit(TurnEvent::Delta {
                    handler,
                    text: delta,
                });
            }
            StreamEvent::Usage(u) => usage.accumulate(&u),
        }
    }

    Ok((text, usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLlmProvider;

    #[tokio::test]
    async fn test_stream_answer_forwards_deltas() {
        let provider = MockLlmProvider::single_response("Photosynthesis makes sugar.")
            .with_stream_chunk_size(8);
        let (sink, mut rx) = ChunkSink::channel();

        let (text, usage) = stream_answer(
            &provider,
            CompletionRequest::new("mock-model", vec![]),
            HandlerKind::SimpleLlm,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(text, "Photosynthesis makes sugar.");
        assert_eq!(usage.total_tokens, 15);

        drop(sink);
        let mut rebuilt = String::new();
        let mut deltas = 0;
        while let Some(event) = rx.recv().await {
            if let TurnEvent::Delta { handler, text } = event {
                assert_eq!(handler, HandlerKind::SimpleLlm);
                rebuilt.push_str(&text);
                deltas += 1;
            }
        }
        assert_eq!(rebuilt, text);
        assert!(deltas > 1);
    }

    #[tokio::test]
    async fn test_stream_answer_propagates_provider_failure() {
        let provider = MockLlmProvider::with_failure();
        let result = stream_answer(
            &provider,
            CompletionRequest::new("mock-model", vec![]),
            HandlerKind::SimpleLlm,
            &ChunkSink::disabled(),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_sink_ignores_events() {
        ChunkSink::disabled().emit(TurnEvent::Final("x".to_string()));
    }
}
