//! End-to-end turn scenarios over mocked collaborators
//!
//! Exercises the orchestrator state machine through its public surface:
//! planning, cursor movement, merge, upload policy, streaming events and
//! re-entry after a finished turn.

use proptest::prelude::*;
use std::sync::Arc;
use tutor_router::handlers::{
    ChatModel, ChunkSink, HandlerOutput, HandlerRegistry, ImageHandler, RagHandler,
    SimpleAnswerHandler, TurnEvent,
};
use tutor_router::imaging::ImageRequest;
use tutor_router::llm::provider::TokenUsage;
use tutor_router::orchestrator::{Orchestrator, EMPTY_PLAN_ANSWER, MAX_PLAN_STEPS};
use tutor_router::retrieval::{CollectionKey, Retriever};
use tutor_router::routing::{HandlerKind, LlmPlanner, Planner, Route};
use tutor_router::session::{
    ChatRole, HistoryCompactor, HistorySettings, LearnerProfile, Persona, TurnInput, TurnPhase,
    TurnState, UploadedFile,
};
use tutor_router::testing::{
    MockEmbedder, MockHandler, MockImageGenerator, MockLlmProvider, MockPlanner, MockVectorStore,
};

fn compactor() -> HistoryCompactor {
    HistoryCompactor::without_summarizer(HistorySettings::default())
}

fn registry_of(handlers: Vec<MockHandler>) -> HandlerRegistry {
    handlers
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, handler| {
            registry.register(Arc::new(handler))
        })
}

fn all_mock_handlers() -> Vec<MockHandler> {
    vec![
        MockHandler::new(HandlerKind::SimpleLlm, "simple answer"),
        MockHandler::new(HandlerKind::Rag, "document answer"),
        MockHandler::new(HandlerKind::WebSearch, "web answer"),
        MockHandler::new(HandlerKind::Image, "image answer"),
    ]
}

fn scripted(planner: Arc<MockPlanner>, handlers: Vec<MockHandler>) -> Orchestrator {
    Orchestrator::new(planner, registry_of(handlers), compactor())
}

fn llm_planner(provider: MockLlmProvider) -> Arc<dyn Planner> {
    Arc::new(LlmPlanner::new(Arc::new(provider), "mock-router".to_string()))
}

fn new_state(persona: Persona) -> TurnState {
    TurnState::new(
        "session-7",
        LearnerProfile {
            persona,
            name: "Sam".to_string(),
            grade: "6".to_string(),
            subject: "science".to_string(),
            ..Default::default()
        },
    )
}

fn snapshot(state: &TurnState) -> serde_json::Value {
    serde_json::to_value(state).unwrap()
}

#[tokio::test]
async fn test_single_step_round_trip() {
    let planner = llm_planner(MockLlmProvider::single_response(
        r#"{"execution_order": ["SimpleLLM"], "reasoning": "general question"}"#,
    ));
    let answers = Arc::new(MockLlmProvider::single_response(
        "Evaporation turns water into vapour.",
    ));
    let orchestrator = Orchestrator::new(
        planner,
        HandlerRegistry::new().register(Arc::new(SimpleAnswerHandler::new(ChatModel::new(
            answers.clone(),
            "mock-model",
        )))),
        compactor(),
    );

    let mut state = new_state(Persona::Teacher);
    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("What is evaporation?"),
            &ChunkSink::disabled(),
        )
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);
    assert!(report.failed.is_empty());
    assert_eq!(report.answer, "Evaporation turns water into vapour.");
    assert_eq!(state.final_answer.as_deref(), Some(report.answer.as_str()));
    assert_eq!(state.simple_response.as_deref(), Some(report.answer.as_str()));
    assert_eq!(state.task_index, 1);
    assert_eq!(state.intermediate_results.len(), 1);
    assert_eq!(state.intermediate_results[0].query, "What is evaporation?");
    assert_eq!(state.phase(), TurnPhase::Terminal);

    // Planner usage plus handler usage
    assert_eq!(report.usage.total_tokens, 30);
    assert_eq!(state.usage.total_tokens, 30);

    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, ChatRole::Human);
    assert_eq!(state.messages[1].role, ChatRole::Assistant);
    assert_eq!(state.messages[1].content, report.answer);
    assert_eq!(answers.recorded_requests().await.len(), 1);
}

#[tokio::test]
async fn test_terminal_state_is_idempotent_without_new_input() {
    let planner = Arc::new(MockPlanner::new(vec![
        HandlerKind::WebSearch,
        HandlerKind::SimpleLlm,
    ]));
    let orchestrator = scripted(planner.clone(), all_mock_handlers());

    let mut state = new_state(Persona::Teacher);
    let first = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("Latest Mars news?").with_websearch(true),
            &ChunkSink::disabled(),
        )
        .await;
    let before = snapshot(&state);

    assert_eq!(orchestrator.step(&mut state).await, Route::End);
    let again = orchestrator
        .run_turn(&mut state, TurnInput::default(), &ChunkSink::disabled())
        .await;

    assert_eq!(snapshot(&state), before);
    assert_eq!(again.answer, first.answer);
    assert!(again.executed.is_empty());
    assert_eq!(again.usage, TokenUsage::default());
    assert_eq!(planner.contexts().await.len(), 1);
}

#[tokio::test]
async fn test_next_message_starts_a_fresh_plan() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::SimpleLlm]));
    let orchestrator = scripted(planner.clone(), all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    orchestrator
        .run_turn(&mut state, TurnInput::message("first"), &ChunkSink::disabled())
        .await;
    orchestrator
        .run_turn(&mut state, TurnInput::message("second"), &ChunkSink::disabled())
        .await;

    let contexts = planner.contexts().await;
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[1].user_message, "second");
    assert_eq!(contexts[1].last_route, Some(HandlerKind::SimpleLlm));
    assert!(contexts[1].recent_history.contains("first"));
    assert_eq!(state.intermediate_results.len(), 1);
    assert_eq!(state.messages.len(), 4);
}

#[tokio::test]
async fn test_fallback_plan_is_deterministic() {
    for _ in 0..3 {
        let orchestrator = Orchestrator::new(
            llm_planner(MockLlmProvider::with_failure()),
            registry_of(all_mock_handlers()),
            compactor(),
        );

        let mut plain = new_state(Persona::Teacher);
        let report = orchestrator
            .run_turn(&mut plain, TurnInput::message("hello"), &ChunkSink::disabled())
            .await;
        assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);

        let mut with_docs = new_state(Persona::Teacher);
        with_docs.doc_urls.push("http://files/notes.pdf".to_string());
        let report = orchestrator
            .run_turn(
                &mut with_docs,
                TurnInput::message("what does it say?"),
                &ChunkSink::disabled(),
            )
            .await;
        assert_eq!(report.executed, vec![HandlerKind::Rag]);
    }
}

#[tokio::test]
async fn test_planner_sees_current_message_once() {
    let router = Arc::new(MockLlmProvider::single_response(
        r#"{"execution_order": ["SimpleLLM"], "reasoning": "general question"}"#,
    ));
    let orchestrator = Orchestrator::new(
        Arc::new(LlmPlanner::new(router.clone(), "mock-router".to_string())),
        registry_of(all_mock_handlers()),
        compactor(),
    );
    let mut state = new_state(Persona::Teacher);

    orchestrator
        .run_turn(&mut state, TurnInput::message("What is osmosis?"), &ChunkSink::disabled())
        .await;

    let requests = router.recorded_requests().await;
    let prompt: String = requests[0]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(prompt.matches("What is osmosis?").count(), 1);
    assert!(prompt.contains("RECENT CONVERSATION:\nNone"));
}

#[tokio::test]
async fn test_unparseable_plan_falls_back() {
    let orchestrator = Orchestrator::new(
        llm_planner(MockLlmProvider::single_response("I think you should search the web.")),
        registry_of(all_mock_handlers()),
        compactor(),
    );
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("hi"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);
    assert_eq!(report.answer, "simple answer");
}

#[tokio::test]
async fn test_fresh_document_upload_overrides_plan() {
    let planner = Arc::new(MockPlanner::new(vec![
        HandlerKind::WebSearch,
        HandlerKind::Image,
    ]));
    let orchestrator = scripted(planner.clone(), all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("summarize this")
                .with_upload(UploadedFile::document("http://files/ch2.pdf", "ch2.pdf")),
            &ChunkSink::disabled(),
        )
        .await;

    assert_eq!(report.executed, vec![HandlerKind::Rag]);
    assert_eq!(state.tasks, vec![HandlerKind::Rag]);
    assert_eq!(state.doc_urls, vec!["http://files/ch2.pdf"]);
    assert_eq!(state.active_docs, vec!["http://files/ch2.pdf"]);
    assert_eq!(
        planner.contexts().await[0].newly_uploaded_docs,
        vec!["ch2.pdf".to_string()]
    );
}

#[tokio::test]
async fn test_uploaded_image_with_image_plan_is_edited() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::Image]));
    let generator = Arc::new(MockImageGenerator::new("https://cdn.example/edited.png"));
    let classifier = ChatModel::new(Arc::new(MockLlmProvider::single_response("edit")), "mock");
    let orchestrator = Orchestrator::new(
        planner,
        HandlerRegistry::new().register(Arc::new(ImageHandler::new(
            classifier,
            generator.clone(),
        ))),
        compactor(),
    );
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("colour in the leaves")
                .with_upload(UploadedFile::image("https://files/leaf.png", "leaf.png")),
            &ChunkSink::disabled(),
        )
        .await;

    assert_eq!(report.executed, vec![HandlerKind::Image]);
    assert_eq!(
        generator.requests().await,
        vec![ImageRequest::Edit {
            prompt: "colour in the leaves".to_string(),
            image_url: "https://files/leaf.png".to_string(),
        }]
    );
    assert_eq!(
        state.img_urls,
        vec!["https://files/leaf.png", "https://cdn.example/edited.png"]
    );
    assert!(report.answer.contains("https://cdn.example/edited.png"));
}

#[tokio::test]
async fn test_uploaded_image_without_image_plan_keeps_plan() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::SimpleLlm]));
    let orchestrator = scripted(planner, all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("what is in this picture?")
                .with_upload(UploadedFile::image("https://files/cell.png", "cell.png")),
            &ChunkSink::disabled(),
        )
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);
    assert!(state.img_urls.is_empty());
    assert!(state.doc_urls.is_empty());
}

#[tokio::test]
async fn test_multi_step_results_are_concatenated_for_teacher() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::Rag, HandlerKind::WebSearch]));
    let orchestrator = scripted(planner, all_mock_handlers());
    let mut state = new_state(Persona::Teacher);
    state.doc_urls.push("http://files/notes.pdf".to_string());

    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("compare my notes with current research"),
            &ChunkSink::disabled(),
        )
        .await;

    assert_eq!(report.executed, vec![HandlerKind::Rag, HandlerKind::WebSearch]);
    assert_eq!(
        report.answer,
        "### Retrieval\ndocument answer\n\n### WebSearch\nweb answer"
    );
    assert_eq!(state.rag_response.as_deref(), Some("document answer"));
    assert_eq!(state.websearch_response.as_deref(), Some("web answer"));
}

#[tokio::test]
async fn test_multi_step_keeps_last_result_for_student() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::WebSearch, HandlerKind::SimpleLlm]));
    let orchestrator = scripted(planner, all_mock_handlers());
    let mut state = new_state(Persona::Student);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("help"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.answer, "simple answer");
    assert_eq!(state.intermediate_results.len(), 2);
}

#[tokio::test]
async fn test_end_step_stops_plan_early() {
    let planner = Arc::new(MockPlanner::new(vec![
        HandlerKind::SimpleLlm,
        HandlerKind::End,
        HandlerKind::WebSearch,
    ]));
    let orchestrator = scripted(planner, all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("hi"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm]);
    assert_eq!(report.answer, "simple answer");
}

#[tokio::test]
async fn test_overlong_plan_is_truncated_and_every_output_is_merged() {
    let mut plan = vec![HandlerKind::SimpleLlm; 32];
    plan.push(HandlerKind::Image);
    let orchestrator = scripted(Arc::new(MockPlanner::new(plan)), all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("tell me everything"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm; MAX_PLAN_STEPS]);
    assert_eq!(state.tasks.len(), MAX_PLAN_STEPS);
    assert_eq!(state.task_index, state.tasks.len());
    assert_eq!(state.intermediate_results.len(), state.task_index);
    assert!(state.response.is_none());
    assert_eq!(state.phase(), TurnPhase::Terminal);
    assert_eq!(report.answer.matches("simple answer").count(), MAX_PLAN_STEPS);
    assert!(state.img_urls.is_empty());
}

#[tokio::test]
async fn test_plan_is_truncated_to_fit_step_limit() {
    let planner = Arc::new(MockPlanner::new(vec![
        HandlerKind::SimpleLlm,
        HandlerKind::Rag,
        HandlerKind::WebSearch,
        HandlerKind::Image,
    ]));
    let orchestrator = scripted(planner, all_mock_handlers()).with_max_steps(3);
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("explain"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.executed, vec![HandlerKind::SimpleLlm, HandlerKind::Rag]);
    assert_eq!(state.task_index, 2);
    assert_eq!(state.intermediate_results.len(), 2);
    assert!(state.response.is_none());
    assert!(report.answer.ends_with("document answer"));
}

#[tokio::test]
async fn test_failed_handler_apology_becomes_answer() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::WebSearch]));
    let orchestrator = scripted(
        planner,
        vec![MockHandler::failing(
            HandlerKind::WebSearch,
            "Sorry, I couldn't search the web.",
        )],
    );
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("news"), &ChunkSink::disabled())
        .await;

    assert_eq!(report.failed, vec![HandlerKind::WebSearch]);
    assert_eq!(report.answer, "Sorry, I couldn't search the web.");
    assert_eq!(state.phase(), TurnPhase::Terminal);
}

#[tokio::test]
async fn test_plan_ending_immediately_uses_placeholder_answer() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::End]));
    let orchestrator = scripted(planner, all_mock_handlers());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("?"), &ChunkSink::disabled())
        .await;

    assert!(report.executed.is_empty());
    assert_eq!(report.answer, EMPTY_PLAN_ANSWER);
}

#[tokio::test]
async fn test_streaming_events_arrive_in_order() {
    let planner = Arc::new(MockPlanner::new(vec![HandlerKind::SimpleLlm]));
    let provider =
        MockLlmProvider::single_response("Fractions name parts of a whole.").with_stream_chunk_size(5);
    let orchestrator = Orchestrator::new(
        planner,
        HandlerRegistry::new().register(Arc::new(SimpleAnswerHandler::new(ChatModel::new(
            Arc::new(provider),
            "mock-model",
        )))),
        compactor(),
    );
    let mut state = new_state(Persona::Teacher);
    let (sink, mut events) = ChunkSink::channel();

    let report = orchestrator
        .run_turn(&mut state, TurnInput::message("fractions?"), &sink)
        .await;
    drop(sink);

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }

    assert_eq!(received.first(), Some(&TurnEvent::HandlerStarted(HandlerKind::SimpleLlm)));
    assert_eq!(received.last(), Some(&TurnEvent::Final(report.answer.clone())));
    assert_eq!(
        received[received.len() - 2],
        TurnEvent::HandlerFinished {
            handler: HandlerKind::SimpleLlm,
            failed: false,
        }
    );

    let deltas: Vec<&str> = received
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Delta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert!(deltas.len() > 1);
    assert_eq!(deltas.concat(), report.answer);
}

#[tokio::test]
async fn test_uploaded_text_is_ingested_and_retrieved() {
    let store = Arc::new(MockVectorStore::new());
    let retriever = Arc::new(Retriever::new(store.clone(), Arc::new(MockEmbedder::new(16))));
    let answers = Arc::new(MockLlmProvider::single_response("Chapter 2 covers mitosis."));
    let orchestrator = Orchestrator::new(
        Arc::new(MockPlanner::new(vec![HandlerKind::SimpleLlm])),
        HandlerRegistry::new().register(Arc::new(RagHandler::new(
            ChatModel::new(answers.clone(), "mock-model"),
            retriever.clone(),
        ))),
        compactor(),
    )
    .with_ingestion(retriever, Default::default());
    let mut state = new_state(Persona::Teacher);

    let report = orchestrator
        .run_turn(
            &mut state,
            TurnInput::message("what is chapter 2 about?").with_upload(
                UploadedFile::document("http://files/ch2.txt", "ch2.txt")
                    .with_content("Chapter 2: mitosis is how one cell divides into two."),
            ),
            &ChunkSink::disabled(),
        )
        .await;

    let key = CollectionKey::session(&state.session_id, &state.profile);
    assert_eq!(store.point_count(key.name()), 1);
    assert_eq!(report.executed, vec![HandlerKind::Rag]);
    assert_eq!(report.answer, "Chapter 2 covers mitosis.");

    let requests = answers.recorded_requests().await;
    assert!(requests[0].messages[0]
        .content
        .contains("mitosis is how one cell divides"));
}

#[tokio::test]
async fn test_long_sessions_are_compacted() {
    let orchestrator = Orchestrator::new(
        Arc::new(MockPlanner::new(vec![HandlerKind::SimpleLlm])),
        registry_of(all_mock_handlers()),
        HistoryCompactor::without_summarizer(HistorySettings {
            retain_messages: 4,
            recent_for_planner: 2,
        }),
    );
    let mut state = new_state(Persona::Teacher);

    for turn in 0..6 {
        orchestrator
            .run_turn(
                &mut state,
                TurnInput::message(format!("question {turn}")),
                &ChunkSink::disabled(),
            )
            .await;
        assert!(state.messages.len() <= 5);
    }

    let summary = state.context.summary.as_deref().unwrap();
    assert!(summary.contains("question 0"));
    assert_eq!(state.messages.last().unwrap().content, "simple answer");
}

fn plan_strategy() -> impl Strategy<Value = Vec<HandlerKind>> {
    prop::collection::vec(
        prop::sample::select(vec![
            HandlerKind::SimpleLlm,
            HandlerKind::Rag,
            HandlerKind::WebSearch,
            HandlerKind::Image,
            HandlerKind::End,
        ]),
        1..6,
    )
}

proptest! {
    #[test]
    fn prop_cursor_is_monotonic_and_matches_results(plan in plan_strategy()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let orchestrator = scripted(
                Arc::new(MockPlanner::new(plan.clone())),
                all_mock_handlers(),
            );
            let mut state = new_state(Persona::Teacher);
            orchestrator
                .begin_turn(&mut state, TurnInput::message("anything"))
                .await;

            let mut dispatched = Vec::new();
            loop {
                let before = state.task_index;
                let route = orchestrator.step(&mut state).await;
                assert!(state.task_index >= before);
                assert!(state.task_index - before <= 1);
                assert_eq!(state.intermediate_results.len(), state.task_index);

                match route {
                    Route::End => break,
                    Route::Handler(kind) => {
                        dispatched.push(kind);
                        state.apply_outcome(
                            kind,
                            Ok(HandlerOutput::text(kind.as_str(), TokenUsage::default())),
                        );
                    }
                }
            }

            let expected: Vec<HandlerKind> = plan
                .iter()
                .copied()
                .take_while(|k| *k != HandlerKind::End)
                .collect();
            assert_eq!(dispatched, expected);
            assert_eq!(state.phase(), TurnPhase::Terminal);
            assert!(state.final_answer.is_some());
        });
    }
}
