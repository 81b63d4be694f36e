//! Conversation history compaction
//!
//! Messages beyond the retention window are folded into
//! `context.summary` so prompts stay bounded however long a session runs.

use crate::handlers::ChatModel;
use crate::llm::provider::Message;
use crate::session::state::{ChatMessage, ChatRole, TurnState};
use tracing::{debug, warn};

/// Cap on the summary kept when the summarizer is unavailable
const MAX_FALLBACK_SUMMARY_CHARS: usize = 2000;

const SUMMARY_SYSTEM_PROMPT: &str = "You maintain a running summary of a tutoring conversation. \
Merge the previous summary with the new messages into at most 150 words. Keep topics covered, \
the learner's difficulties and any promises the tutor made. Reply with the summary only.";

/// Window sizes for history handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySettings {
    /// Messages kept verbatim in `TurnState::messages`
    pub retain_messages: usize,
    /// Messages shown to the planner
    pub recent_for_planner: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retain_messages: 12,
            recent_for_planner: 6,
        }
    }
}

/// Keeps the message log inside its window
pub struct HistoryCompactor {
    summarizer: Option<ChatModel>,
    settings: HistorySettings,
}

impl HistoryCompactor {
    pub fn new(summarizer: ChatModel, settings: HistorySettings) -> Self {
        Self {
            summarizer: Some(summarizer),
            settings,
        }
    }

    /// Compactor that only ever uses the transcript fallback
    pub fn without_summarizer(settings: HistorySettings) -> Self {
        Self {
            summarizer: None,
            settings,
        }
    }

    pub fn settings(&self) -> HistorySettings {
        self.settings
    }

    /// Recent conversation as shown to the planner, excluding the message
    /// being planned
    pub fn planner_history(&self, state: &TurnState) -> String {
        state.prior_history_text(self.settings.recent_for_planner)
    }

    /// Move messages older than the window into the summary.
    ///
    /// Returns the number of messages folded in.
    pub async fn compact(&self, state: &mut TurnState) -> usize {
        let retain = self.settings.retain_messages.max(1);
        if state.messages.len() <= retain {
            return 0;
        }

        let overflow = state.messages.len() - retain;
        let older: Vec<ChatMessage> = state.messages.drain(..overflow).collect();
        let previous = state.context.summary.take();

        let summary = match self.summarize(previous.as_deref(), &older, state).await {
            Some(summary) => summary,
            None => fallback_summary(previous.as_deref(), &older),
        };
        debug!(
            folded = overflow,
            summary_len = summary.len(),
            "Compacted conversation history"
        );
        state.context.summary = Some(summary);
        overflow
    }

    async fn summarize(
        &self,
        previous: Option<&str>,
        older: &[ChatMessage],
        state: &mut TurnState,
    ) -> Option<String> {
        let model = self.summarizer.as_ref()?;
        let prompt = format!(
            "Previous summary:\n{}\n\nNew messages:\n{}",
            previous.unwrap_or("None"),
            transcript(older)
        );
        let request = model.request(vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(prompt),
        ]);

        match model.provider.complete(request).await {
            Ok(response) => {
                state.usage.accumulate(&response.usage);
                response
                    .content
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
            }
            Err(e) => {
                warn!(error = %e, "History summarization failed, keeping transcript");
                None
            }
        }
    }
}

fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                ChatRole::Human => "Learner",
                ChatRole::Assistant => "Tutor",
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Previous summary plus the folded transcript, keeping the newest text
fn fallback_summary(previous: Option<&str>, older: &[ChatMessage]) -> String {
    let combined = match previous.filter(|p| !p.is_empty()) {
        Some(previous) => format!("{previous}\n{}", transcript(older)),
        None => transcript(older),
    };

    let total = combined.chars().count();
    if total <= MAX_FALLBACK_SUMMARY_CHARS {
        combined
    } else {
        combined.chars().skip(total - MAX_FALLBACK_SUMMARY_CHARS).collect()
    }
}
