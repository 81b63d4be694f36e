//! Deterministic adjustments applied to every freshly planned turn

use crate::routing::HandlerKind;
use crate::session::TurnState;
use tracing::debug;

/// Which policy rule changed the plan, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAdjustment {
    Unchanged,
    /// Uploaded images seeded `img_urls` for an edit request
    ImageEdit,
    /// A fresh document upload forced a retrieval-only plan
    UploadOverride,
}

/// Apply the post-planning policy to `state.tasks` and the image list.
///
/// Rules run in order:
/// 1. no Image step: the session image list is cleared
/// 2. as many edit images as uploads and the plan starts with Image:
///    the uploads become the image list
/// 3. otherwise a freshly uploaded document forces `[Rag]`
pub fn adjust_plan(state: &mut TurnState) -> PlanAdjustment {
    if !state.tasks.contains(&HandlerKind::Image) {
        state.img_urls.clear();
    }

    let edit_count = state.edit_img_urls.len();
    if edit_count > 0
        && edit_count == state.new_uploaded_docs.len()
        && state.tasks.first() == Some(&HandlerKind::Image)
    {
        state.img_urls = state.edit_img_urls.clone();
        debug!(images = edit_count, "Plan treated as image edit");
        return PlanAdjustment::ImageEdit;
    }

    if state.freshly_uploaded_document() {
        if state.tasks != [HandlerKind::Rag] {
            debug!(planned = ?state.tasks, "Fresh upload overrides plan with retrieval");
        }
        state.tasks = vec![HandlerKind::Rag];
        return PlanAdjustment::UploadOverride;
    }

    PlanAdjustment::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LearnerProfile, UploadedFile};

    fn state_with_plan(plan: Vec<HandlerKind>) -> TurnState {
        let mut state = TurnState::new("s", LearnerProfile::default());
        state.tasks = plan;
        state
    }

    #[test]
    fn test_fresh_pdf_overrides_simple_plan() {
        let mut state = state_with_plan(vec![HandlerKind::SimpleLlm]);
        state
            .new_uploaded_docs
            .push(UploadedFile::document("http://x/notes.pdf", "notes.pdf"));

        assert_eq!(adjust_plan(&mut state), PlanAdjustment::UploadOverride);
        assert_eq!(state.tasks, vec![HandlerKind::Rag]);
    }

    #[test]
    fn test_uploaded_image_with_image_plan_is_edit() {
        let mut state = state_with_plan(vec![HandlerKind::Image]);
        state.edit_img_urls = vec!["http://x/img.png".to_string()];
        state
            .new_uploaded_docs
            .push(UploadedFile::image("http://x/img.png", "img.png"));

        assert_eq!(adjust_plan(&mut state), PlanAdjustment::ImageEdit);
        assert_eq!(state.img_urls, vec!["http://x/img.png"]);
        assert_eq!(state.tasks, vec![HandlerKind::Image]);
    }

    #[test]
    fn test_plan_without_image_clears_image_list() {
        let mut state = state_with_plan(vec![HandlerKind::WebSearch]);
        state.img_urls = vec!["http://x/old.png".to_string()];

        assert_eq!(adjust_plan(&mut state), PlanAdjustment::Unchanged);
        assert!(state.img_urls.is_empty());
        assert_eq!(state.tasks, vec![HandlerKind::WebSearch]);
    }

    #[test]
    fn test_image_plan_keeps_previous_images_without_uploads() {
        let mut state = state_with_plan(vec![HandlerKind::Image]);
        state.img_urls = vec!["http://x/old.png".to_string()];

        assert_eq!(adjust_plan(&mut state), PlanAdjustment::Unchanged);
        assert_eq!(state.img_urls, vec!["http://x/old.png"]);
    }

    #[test]
    fn test_uploaded_image_without_image_plan_is_not_override() {
        let mut state = state_with_plan(vec![HandlerKind::SimpleLlm]);
        state.edit_img_urls = vec!["http://x/img.png".to_string()];
        state
            .new_uploaded_docs
            .push(UploadedFile::image("http://x/img.png", "img.png"));

        assert_eq!(adjust_plan(&mut state), PlanAdjustment::Unchanged);
        assert_eq!(state.tasks, vec![HandlerKind::SimpleLlm]);
        assert!(state.img_urls.is_empty());
    }
}
