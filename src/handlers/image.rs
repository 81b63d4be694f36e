//! Image generation and editing

use super::{ChatModel, ChunkSink, Handler, HandlerFailure, HandlerOutcome, HandlerOutput};
use crate::imaging::{ImageGenerator, ImageRequest};
use crate::llm::provider::{Message, TokenUsage};
use crate::routing::HandlerKind;
use crate::session::TurnState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const IMAGE_APOLOGY: &str = "Sorry, I couldn't process the image.";

const INTENT_SYSTEM_PROMPT: &str = "You classify image requests. The learner already has an image. \
Reply with exactly one word: \"edit\" if they want to change that image, or \"generate\" if they want a new one.";

const ENHANCE_SYSTEM_PROMPT: &str = "Rewrite the learner's request as a detailed prompt for an \
educational illustration: describe subject, composition, style and labels. Keep it under 80 words \
and reply with the prompt only.";

/// Words that suggest changing an existing image
const EDIT_KEYWORDS: &[&str] = &[
    "edit", "change", "modify", "adjust", "recolor", "colour", "color", "remove", "add ",
    "replace", "make it", "make the", "turn it", "update",
];

/// Whether the learner wants a new image or a change to an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageIntent {
    Generate,
    Edit,
}

impl ImageIntent {
    /// Keyword heuristic used when the classifier call fails
    pub fn from_keywords(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if EDIT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            ImageIntent::Edit
        } else {
            ImageIntent::Generate
        }
    }

    /// Parse the classifier's one-word reply
    pub fn parse(reply: &str) -> Option<Self> {
        let lowered = reply.trim().to_lowercase();
        if lowered.contains("edit") {
            Some(ImageIntent::Edit)
        } else if lowered.contains("generate") {
            Some(ImageIntent::Generate)
        } else {
            None
        }
    }
}

/// Creates or edits one image per invocation
pub struct ImageHandler {
    model: ChatModel,
    generator: Arc<dyn ImageGenerator>,
    enhance_prompts: bool,
}

impl ImageHandler {
    pub fn new(model: ChatModel, generator: Arc<dyn ImageGenerator>) -> Self {
        Self {
            model,
            generator,
            enhance_prompts: true,
        }
    }

    pub fn with_prompt_enhancement(mut self, enabled: bool) -> Self {
        self.enhance_prompts = enabled;
        self
    }

    /// Decide edit vs. generate; without a prior image it is always generate
    async fn classify(&self, state: &TurnState, usage: &mut TokenUsage) -> ImageIntent {
        if state.img_urls.is_empty() {
            return ImageIntent::Generate;
        }

        let request = self
            .model
            .request(vec![
                Message::system(INTENT_SYSTEM_PROMPT),
                Message::user(state.resolved_query.clone()),
            ])
            .with_max_tokens(Some(5));

        match self.model.provider.complete(request).await {
            Ok(response) => {
                usage.accumulate(&response.usage);
                response
                    .content
                    .as_deref()
                    .and_then(ImageIntent::parse)
                    .unwrap_or_else(|| ImageIntent::from_keywords(&state.resolved_query))
            }
            Err(e) => {
                warn!(error = %e, "Intent classification failed, using keywords");
                ImageIntent::from_keywords(&state.resolved_query)
            }
        }
    }

    /// Expand a short request into a richer prompt, falling back to the raw query
    async fn enhance(&self, state: &TurnState, usage: &mut TokenUsage) -> String {
        let raw = state.resolved_query.clone();
        if !self.enhance_prompts {
            return raw;
        }

        let context = format!(
            "Learner: grade {} {}\nRequest: {}",
            state.profile.grade, state.profile.subject, raw
        );
        let request = self.model.request(vec![
            Message::system(ENHANCE_SYSTEM_PROMPT),
            Message::user(context),
        ]);

        match self.model.provider.complete(request).await {
            Ok(response) => {
                usage.accumulate(&response.usage);
                response
                    .content
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .unwrap_or(raw)
            }
            Err(e) => {
                warn!(error = %e, "Prompt enhancement failed, using request as-is");
                raw
            }
        }
    }
}

#[async_trait]
impl Handler for ImageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Image
    }

    async fn handle(&self, state: &TurnState, _sink: &ChunkSink) -> HandlerOutcome {
        let mut usage = TokenUsage::default();
        let intent = self.classify(state, &mut usage).await;

        let request = match (intent, state.img_urls.last()) {
            (ImageIntent::Edit, Some(image_url)) => ImageRequest::Edit {
                prompt: state.resolved_query.clone(),
                image_url: image_url.clone(),
            },
            _ => ImageRequest::Generate {
                prompt: self.enhance(state, &mut usage).await,
            },
        };
        debug!(intent = ?intent, "Calling image API");

        match self.generator.generate(&request).await {
            Ok(url) => Ok(HandlerOutput::image(url).with_usage(usage)),
            Err(e) => {
                warn!(error = %e, "Image generation failed");
                Err(HandlerFailure::from_error(IMAGE_APOLOGY, &e).with_usage(usage))
            }
        }
    }
}
