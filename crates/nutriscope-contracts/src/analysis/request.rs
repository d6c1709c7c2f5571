use std::sync::Arc;

use super::goal::Goal;
use super::prompt::effective_notes;

/// Inputs captured for one analysis. Image bytes are shared, never copied or
/// mutated after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub image_bytes: Arc<[u8]>,
    pub user_notes: Option<String>,
    pub goal: Goal,
}

impl AnalysisRequest {
    pub fn new(image_bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            image_bytes: image_bytes.into(),
            user_notes: None,
            goal: Goal::General,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.user_notes = Some(notes.into());
        self
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = goal;
        self
    }

    pub fn effective_notes(&self) -> Option<String> {
        effective_notes(self.user_notes.as_deref(), self.goal)
    }
}
